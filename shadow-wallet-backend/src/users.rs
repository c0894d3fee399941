use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shadow_wallet_state::{
    AccountPatch, Amount, NewAccount, Preferences, PreferencesPatch, PrivateKeyMaterial,
    WalletAccount,
};

use crate::{error::ApiError, AppState};

/// Account as returned over HTTP. Key material never leaves the server.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountView {
    wallet_address: String,
    public_key: String,
    shielded_balance: Amount,
    preferences: Preferences,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletAccount> for AccountView {
    fn from(account: WalletAccount) -> Self {
        Self {
            wallet_address: account.wallet_address,
            public_key: account.public_key,
            shielded_balance: account.shielded_balance,
            preferences: account.preferences,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserQuery {
    wallet_address: Option<String>,
}

impl UserQuery {
    pub(crate) fn require_address(self) -> Result<String, ApiError> {
        self.wallet_address
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("Wallet address is required"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateUserRequest {
    wallet_address: Option<String>,
    public_key: Option<String>,
    private_key: Option<PrivateKeyMaterial>,
    preferences: Option<PreferencesPatch>,
}

pub(crate) async fn get_user(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<AccountView>, ApiError> {
    let address = query.require_address()?;
    let account = state.projector().get(&address)?;
    Ok(Json(account.into()))
}

pub(crate) async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountView>), ApiError> {
    let Json(req) = payload?;
    let (Some(wallet_address), Some(public_key)) = (
        req.wallet_address.filter(|v| !v.trim().is_empty()),
        req.public_key.filter(|v| !v.trim().is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "Wallet address and public key are required",
        ));
    };

    let mut preferences = state.client_settings().default_preferences();
    if let Some(patch) = req.preferences {
        if let Some(enable_testnets) = patch.enable_testnets {
            preferences.enable_testnets = enable_testnets;
        }
        if let Some(default_token) = patch.default_token {
            preferences.default_token = default_token;
        }
    }

    let account = state.projector().register(NewAccount {
        wallet_address,
        public_key,
        private_key: req.private_key,
        preferences: Some(preferences),
    })?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

pub(crate) async fn update_user(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    payload: Result<Json<AccountPatch>, JsonRejection>,
) -> Result<Json<AccountView>, ApiError> {
    let address = query.require_address()?;
    let Json(patch) = payload?;
    let account = state.projector().update(&address, patch).await?;
    Ok(Json(account.into()))
}
