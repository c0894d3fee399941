use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use shadow_wallet_state::{
    Amount, ConfirmationStats, OperationReceipt, ReconcileReport, TransactionRecord, WalletError,
    WalletResult,
};

use crate::{error::ApiError, transactions::AmountField, users::AccountView, AppState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReceiptView {
    transaction: TransactionRecord,
    account: AccountView,
}

impl From<OperationReceipt> for ReceiptView {
    fn from(receipt: OperationReceipt) -> Self {
        Self {
            transaction: receipt.transaction,
            account: receipt.account.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectRequest {
    wallet_address: Option<String>,
    public_key: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct AmountRequest {
    amount: Option<AmountField>,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferRequest {
    recipient_address: Option<String>,
    amount: Option<AmountField>,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BalanceResponse {
    wallet_address: String,
    shielded_balance: Amount,
    ledger_balance: Amount,
    drift: Amount,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    status: &'static str,
    app_name: String,
    adjust_mode: &'static str,
    confirmations: ConfirmationStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientConfigResponse {
    app_name: String,
    wallet_connect_project_id: Option<String>,
    enable_testnets: bool,
}

pub(crate) async fn connect(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<AccountView>, ApiError> {
    let Json(req) = payload?;
    let address = req
        .wallet_address
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Wallet address is required"))?;
    let public_key = req.public_key.unwrap_or_default();

    let account = state.projector().get_or_create(&address, &public_key)?;
    Ok(Json(account.into()))
}

pub(crate) async fn balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.projector().get(&address)?;
    let ledger_balance = state.projector().ledger_balance(&address)?;
    let drift = balance_drift(&address, account.shielded_balance, ledger_balance)?;

    Ok(Json(BalanceResponse {
        wallet_address: account.wallet_address,
        shielded_balance: account.shielded_balance,
        ledger_balance,
        drift,
    }))
}

pub(crate) async fn shield(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReceiptView>), ApiError> {
    let Json(req) = payload?;
    let amount = required_amount(req.amount.as_ref())?;
    let token = token_or_default(&state, &address, req.token)?;

    let receipt = state.orchestrator().shield(&address, amount, &token).await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

pub(crate) async fn transfer(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReceiptView>), ApiError> {
    let Json(req) = payload?;
    let recipient = req
        .recipient_address
        .filter(|recipient| !recipient.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Recipient address is required"))?;
    let amount = required_amount(req.amount.as_ref())?;
    let token = token_or_default(&state, &address, req.token)?;

    // the confirmation task runs detached; its outcome shows up in /api/health
    let submitted = state
        .orchestrator()
        .transfer(&address, &recipient, amount, &token)
        .await?;
    Ok((StatusCode::CREATED, Json(submitted.receipt.into())))
}

pub(crate) async fn unshield(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReceiptView>), ApiError> {
    let Json(req) = payload?;
    let amount = required_amount(req.amount.as_ref())?;
    let token = token_or_default(&state, &address, req.token)?;

    let receipt = state.orchestrator().unshield(&address, amount, &token).await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

pub(crate) async fn reconcile(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let report = state.projector().reconcile(&address).await?;
    Ok(Json(report))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app_name: state.client_settings().app_name.clone(),
        adjust_mode: state.projector().mode().as_str(),
        confirmations: state.orchestrator().confirmations().stats(),
    })
}

pub(crate) async fn client_config(State(state): State<AppState>) -> Json<ClientConfigResponse> {
    let client = state.client_settings();
    Json(ClientConfigResponse {
        app_name: client.app_name.clone(),
        wallet_connect_project_id: client.walletconnect_project_id.clone(),
        enable_testnets: client.enable_testnets,
    })
}

fn balance_drift(address: &str, cached: Amount, ledger: Amount) -> WalletResult<Amount> {
    cached
        .checked_sub(ledger)
        .ok_or_else(|| WalletError::validation(format!("balance drift of {address} overflows")))
}

fn required_amount(field: Option<&AmountField>) -> WalletResult<Amount> {
    match field {
        Some(field) => field.parse(),
        None => Err(WalletError::validation("Amount is required")),
    }
}

/// Falls back to the wallet's preferred token when the request names none.
fn token_or_default(state: &AppState, address: &str, token: Option<String>) -> Result<String, ApiError> {
    match token.filter(|token| !token.trim().is_empty()) {
        Some(token) => Ok(token),
        None => Ok(state.projector().get(address)?.preferences.default_token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_is_cached_minus_ledger_and_reports_overflow() {
        let amount = |s: &str| s.parse::<Amount>().unwrap();
        assert_eq!(
            balance_drift("0xABC", amount("1.5"), amount("0.25")).unwrap().to_string(),
            "1.250"
        );

        let widest = amount("79228162514264337593543950.335");
        assert!(matches!(
            balance_drift("0xABC", widest, -widest),
            Err(WalletError::Validation(_))
        ));
    }
}
