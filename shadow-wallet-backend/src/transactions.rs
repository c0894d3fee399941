use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shadow_wallet_state::{
    Amount, NewTransaction, Privacy, ProofStatement, TransactionPatch, TransactionRecord, TxKind,
    WalletResult, DEFAULT_PAGE_LIMIT,
};
use tracing::info;
use uuid::Uuid;

use crate::{error::ApiError, wallets::ReceiptView, AppState};

const DEFAULT_CANCEL_REASON: &str = "cancelled by request";

/// Amounts are accepted as JSON strings or numbers.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum AmountField {
    Text(String),
    Number(serde_json::Number),
}

impl AmountField {
    pub(crate) fn parse(&self) -> WalletResult<Amount> {
        match self {
            AmountField::Text(raw) => raw.parse(),
            AmountField::Number(number) => number.to_string().parse(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    wallet_address: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct UpdateQuery {
    id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTransactionRequest {
    wallet_address: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    amount: Option<AmountField>,
    token: Option<String>,
    recipient_address: Option<String>,
    privacy: Option<String>,
    zk_proof: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct CancelRequest {
    reason: Option<String>,
}

pub(crate) async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let address = query
        .wallet_address
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Wallet address is required"))?;
    let limit = parse_page_param("limit", query.limit, DEFAULT_PAGE_LIMIT)?;
    let offset = parse_page_param("offset", query.offset, 0)?;

    let records = state.ledger().list(&address, limit, offset)?;
    Ok(Json(records))
}

pub(crate) async fn create_transaction(
    State(state): State<AppState>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionRecord>), ApiError> {
    let Json(req) = payload?;
    let (Some(wallet_address), Some(kind), Some(amount), Some(token), Some(privacy)) = (
        req.wallet_address.filter(|v| !v.trim().is_empty()),
        req.kind,
        req.amount,
        req.token.filter(|v| !v.trim().is_empty()),
        req.privacy,
    ) else {
        return Err(ApiError::bad_request(
            "Missing required fields: walletAddress, type, amount, token, privacy",
        ));
    };
    let kind: TxKind = kind.parse()?;
    let privacy: Privacy = privacy.parse()?;
    let amount = amount.parse()?;

    let prover = state.orchestrator().prover();
    let zk_proof = match req.zk_proof.filter(|proof| !proof.trim().is_empty()) {
        Some(proof) => Some(proof),
        None if privacy.requires_proof() => Some(prover.prove(&ProofStatement {
            kind,
            wallet_address: &wallet_address,
            recipient_address: req.recipient_address.as_deref(),
            amount,
            token: &token,
        })?),
        None => None,
    };

    let new = NewTransaction {
        wallet_address,
        kind: Some(kind),
        amount: Some(amount),
        token: Some(token),
        recipient_address: req.recipient_address,
        privacy: Some(privacy),
        zk_proof,
        tx_hash: Some(prover.transaction_hash()),
        // raw records never touch the cached balance
        balance_applied: false,
    };
    let record = state.ledger().append(new)?;
    info!(
        tx_id = %record.id,
        wallet = %record.wallet_address,
        kind = %record.kind,
        amount = %record.amount,
        "transaction recorded"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn update_transaction(
    State(state): State<AppState>,
    Query(query): Query<UpdateQuery>,
    payload: Result<Json<TransactionPatch>, JsonRejection>,
) -> Result<Json<TransactionRecord>, ApiError> {
    let raw_id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Transaction id is required"))?;
    let id = parse_transaction_id(&raw_id)?;
    let Json(patch) = payload?;

    let record = state.ledger().update_status(id, patch)?;
    Ok(Json(record))
}

pub(crate) async fn cancel_transaction(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<ReceiptView>, ApiError> {
    let id = parse_transaction_id(&raw_id)?;
    let reason = payload
        .and_then(|Json(req)| req.reason)
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

    let receipt = state.orchestrator().cancel(id, &reason).await?;
    Ok(Json(receipt.into()))
}

fn parse_page_param(name: &str, raw: Option<String>, default: usize) -> Result<usize, ApiError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ApiError::bad_request(format!("{name} must be a non-negative integer, got '{value}'"))
        }),
    }
}

/// Ids that are not UUIDs cannot name a stored record.
fn parse_transaction_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::not_found(format!("transaction {raw} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_field_accepts_strings_and_numbers() {
        let text: AmountField = serde_json::from_str("\"0.3\"").unwrap();
        let number: AmountField = serde_json::from_str("0.3").unwrap();
        let integer: AmountField = serde_json::from_str("2").unwrap();
        assert_eq!(text.parse().unwrap().to_string(), "0.300");
        assert_eq!(number.parse().unwrap().to_string(), "0.300");
        assert_eq!(integer.parse().unwrap().to_string(), "2.000");

        let garbage: AmountField = serde_json::from_str("\"lots\"").unwrap();
        assert!(garbage.parse().is_err());
    }

    #[test]
    fn page_params_default_and_reject_garbage() {
        assert_eq!(parse_page_param("limit", None, 10).unwrap(), 10);
        assert_eq!(parse_page_param("limit", Some(" ".into()), 10).unwrap(), 10);
        assert_eq!(parse_page_param("offset", Some("5".into()), 0).unwrap(), 5);
        assert_eq!(
            parse_page_param("limit", Some("ten".into()), 10)
                .unwrap_err()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert!(parse_page_param("offset", Some("-1".into()), 0).is_err());
    }

    #[test]
    fn malformed_ids_are_not_found() {
        assert_eq!(
            parse_transaction_id("not-a-uuid").unwrap_err().status(),
            StatusCode::NOT_FOUND
        );
        let id = Uuid::new_v4();
        assert_eq!(parse_transaction_id(&id.to_string()).unwrap(), id);
    }
}
