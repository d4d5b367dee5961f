use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use paydrop_db::models::{FileRow, TransactionRow};
use paydrop_db::{format_ts, parse_ts, Database, NewFile, NewPayment};
use paydrop_types::api::{
    CleanupResponse, CompletePaymentData, CompletePaymentRequest, FileInfo, FileInfoResponse,
    FileListResponse, HealthResponse, InitiatePaymentData, InitiatePaymentRequest,
    PaymentResponse, PaymentStatusData, TransactionEntry, TransactionListResponse,
    UploadResponse,
};
use paydrop_types::{EventType, PaymentStatus};
use paydrop_x402::challenge::{self, headers as x402_headers};
use paydrop_x402::{
    ChallengeMetadata, Gate, GateError, PaymentChallenge, PaymentProof, PaymentRequirements,
};

use crate::error::ApiError;
use crate::storage::Storage;
use crate::{links, pricing, reaper};

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub storage: Arc<Storage>,
    pub gate: Arc<Gate>,
    pub max_file_size: usize,
    pub pending_grace: chrono::Duration,
}

// ── Upload ──────────────────────────────────────────────────────────────

/// POST /api/files/upload — multipart `file` + `duration`, guarded by the
/// x402 gate. Invalid requests are rejected before any payment interaction;
/// nothing is persisted until settlement has succeeded.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file_bytes: Option<bytes::Bytes> = None;
    let mut original_filename = String::new();
    let mut mime_type: Option<String> = None;
    let mut duration_field: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                original_filename = field.file_name().unwrap_or("upload.bin").to_string();
                mime_type = field.content_type().map(str::to_string);
                file_bytes = Some(field.bytes().await.map_err(|e| {
                    ApiError::Validation(format!("Failed to read file field: {}", e))
                })?);
            }
            Some("duration") => {
                duration_field = Some(field.text().await.map_err(|e| {
                    ApiError::Validation(format!("Failed to read duration field: {}", e))
                })?);
            }
            _ => {}
        }
    }

    // Free rejections first: no on-chain cost for invalid requests.
    let bytes = match file_bytes {
        Some(b) if !b.is_empty() => b,
        _ => return Err(ApiError::Validation("No file provided".to_string())),
    };
    if bytes.len() > state.max_file_size {
        return Err(ApiError::Validation(format!(
            "File size exceeds maximum limit of {} MB",
            state.max_file_size / (1024 * 1024)
        )));
    }
    let duration = duration_field
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok())
        .filter(|d| pricing::is_valid_duration(*d))
        .ok_or_else(|| {
            ApiError::Validation("Invalid duration. Must be 1, 7, or 30 days".to_string())
        })?;
    let price = pricing::price_for(duration)
        .ok_or_else(|| ApiError::Internal(anyhow!("no price for duration {}", duration)))?;

    let resource = request_resource(&headers, "/api/files/upload");
    let description = format!(
        "Upload file for {} day(s) - {}",
        duration, original_filename
    );
    let accepts = vec![state
        .gate
        .build_requirements(price, &resource, &description)
        .map_err(|e| ApiError::Internal(anyhow!(e)))?];

    let Some(payment_header) = headers
        .get(x402_headers::PAYMENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        info!("Upload rejected: no X-PAYMENT header");
        return Err(ApiError::VerificationFailed {
            reason: "X-PAYMENT header is required".to_string(),
            payer: None,
            accepts,
        });
    };

    if let Err(e) = state.gate.verify(&payment_header, &accepts).await {
        info!("Upload payment verification failed: {}", e);
        return Err(verification_error(e, accepts));
    }

    // Verified; settle before anything is persisted. A valid-but-unsettled
    // proof must never store a file.
    let receipt = match state.gate.settle(&payment_header, &accepts[0]).await {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!("Upload payment settlement failed: {}", e);
            return Err(settlement_error(e, accepts));
        }
    };

    let file_id = Uuid::new_v4().to_string();
    let share_link = links::generate_share_link();
    let expiry = format_ts(links::calculate_expiry(Utc::now(), duration));
    let price_str = price.to_string();

    let path = state
        .storage
        .save_blob(&file_id, &bytes)
        .await
        .map_err(ApiError::Internal)?;
    let path_str = path.display().to_string();

    let record = match state.db.create_file(&NewFile {
        id: &file_id,
        filename: &file_id,
        original_filename: &original_filename,
        filepath: &path_str,
        file_size: bytes.len() as i64,
        mime_type: mime_type.as_deref(),
        duration_days: duration,
        price_usd: &price_str,
        share_link: &share_link,
        expiry_date: &expiry,
        payment_status: PaymentStatus::Completed.as_str(),
    }) {
        Ok(record) => record,
        Err(e) => {
            // No orphaned blobs on failure paths.
            let _ = state.storage.delete_blob(&file_id).await;
            return Err(ApiError::Internal(e));
        }
    };

    let receipt_ref: String = receipt.chars().take(100).collect();
    let persisted = persist_upload_payment(&state.db, &record, &receipt_ref);
    if let Err(e) = persisted {
        let _ = state.storage.delete_blob(&file_id).await;
        let _ = state.db.delete_file(&file_id);
        return Err(ApiError::Internal(e));
    }

    info!(
        "Upload successful: {} ({} bytes, {} days, ${})",
        share_link,
        record.file_size,
        duration,
        price_str
    );

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&receipt) {
        response_headers.insert(
            HeaderName::from_static("x-payment-response"),
            value,
        );
    }
    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(UploadResponse {
            success: true,
            message: "File uploaded successfully".to_string(),
            data: file_info(&record)?,
        }),
    ))
}

fn persist_upload_payment(
    db: &Database,
    record: &FileRow,
    receipt_ref: &str,
) -> anyhow::Result<()> {
    let payment = db.create_payment(&NewPayment {
        id: &Uuid::new_v4().to_string(),
        file_id: &record.id,
        amount_usd: &record.price_usd,
        payment_status: PaymentStatus::Completed.as_str(),
        transaction_hash: Some(receipt_ref),
        payment_data: None,
    })?;

    let event = json!({
        "filename": record.original_filename,
        "size": record.file_size,
        "duration": record.duration_days,
        "price": record.price_usd,
        "paymentSettled": true,
    });
    db.create_transaction(
        &Uuid::new_v4().to_string(),
        &record.id,
        Some(&payment.id),
        EventType::FileUploaded.as_str(),
        Some(&event.to_string()),
    )?;
    Ok(())
}

// ── Download ────────────────────────────────────────────────────────────

/// GET /api/download/{share_link} — guarded download.
///
/// Ladder: 404 unknown link, 410 past expiry (regardless of payment
/// status), then stream if paid, promote-then-stream on a matching payment
/// proof, otherwise 402 with the structured challenge.
pub async fn download_file(
    State(state): State<AppState>,
    Path(share_link): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file = state
        .db
        .get_file_by_share_link(&share_link)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let expiry = parse_ts(&file.expiry_date).map_err(ApiError::Internal)?;
    if links::is_expired(expiry, Utc::now()) {
        return Err(ApiError::Expired(
            "File has expired and is no longer available".to_string(),
        ));
    }

    let mut paid = file.payment_status == PaymentStatus::Completed.as_str();

    if let Some(proof) = payment_proof(&headers) {
        // The attested file id must match the resource being requested;
        // this path never re-verifies the transaction on chain.
        if proof.file_id == file.id && !proof.transaction_hash.is_empty() {
            if !paid {
                promote_to_completed(&state.db, &file, &proof)?;
                paid = true;
            }
        } else {
            warn!(
                "Ignoring payment proof attesting file {} on download of {}",
                proof.file_id, file.id
            );
        }
    }

    if !paid {
        return Err(ApiError::PaymentRequired(Box::new(build_challenge(
            &state, &file,
        )?)));
    }

    stream_blob(&file).await
}

fn payment_proof(headers: &HeaderMap) -> Option<PaymentProof> {
    let raw = headers
        .get(x402_headers::PAYMENT_PROOF)?
        .to_str()
        .ok()?;
    match serde_json::from_str::<PaymentProof>(raw) {
        Ok(proof) => Some(proof),
        Err(e) => {
            warn!("Unparseable payment proof header: {}", e);
            None
        }
    }
}

/// Promote the file and its latest payment to completed. Both updates are
/// conditional on the current status still being pending, so two racing
/// downloads cannot double-apply and the transition never reverses.
fn promote_to_completed(
    db: &Database,
    file: &FileRow,
    proof: &PaymentProof,
) -> Result<(), ApiError> {
    let payment = match db
        .get_payment_by_file_id(&file.id)
        .map_err(ApiError::Internal)?
    {
        Some(payment) => payment,
        None => db
            .create_payment(&NewPayment {
                id: &Uuid::new_v4().to_string(),
                file_id: &file.id,
                amount_usd: &file.price_usd,
                payment_status: PaymentStatus::Pending.as_str(),
                transaction_hash: None,
                payment_data: None,
            })
            .map_err(ApiError::Internal)?,
    };

    let proof_json = serde_json::to_string(proof).ok();
    let payment_promoted = db
        .complete_payment(
            &payment.id,
            Some(&proof.transaction_hash),
            proof_json.as_deref(),
        )
        .map_err(ApiError::Internal)?;
    let file_promoted = db
        .complete_file_payment(&file.id)
        .map_err(ApiError::Internal)?;

    if payment_promoted || file_promoted {
        let event = json!({
            "transactionHash": proof.transaction_hash,
            "amount": file.price_usd,
        });
        db.create_transaction(
            &Uuid::new_v4().to_string(),
            &file.id,
            Some(&payment.id),
            EventType::PaymentCompleted.as_str(),
            Some(&event.to_string()),
        )
        .map_err(ApiError::Internal)?;
        info!("Payment completed for file {} via download proof", file.id);
    }
    Ok(())
}

fn build_challenge(state: &AppState, file: &FileRow) -> Result<PaymentChallenge, ApiError> {
    let asset = state
        .gate
        .asset()
        .map_err(|e| ApiError::Internal(anyhow!(e)))?;
    Ok(PaymentChallenge {
        amount: file.price_usd.clone(),
        currency: "USDC".to_string(),
        receiver: state.gate.receiver().to_string(),
        network: state.gate.network().to_string(),
        chain_id: asset.chain_id.to_string(),
        description: format!("Download {}", file.original_filename),
        metadata: ChallengeMetadata {
            file_id: file.id.clone(),
            share_link: file.share_link.clone(),
            filename: file.original_filename.clone(),
            size: file.file_size,
            duration: file.duration_days,
        },
        nonce: challenge::new_nonce(),
        timestamp: challenge::now_millis(),
    })
}

async fn stream_blob(file: &FileRow) -> Result<Response, ApiError> {
    let handle = match tokio::fs::File::open(&file.filepath).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Blob missing for live file {}: {}", file.id, file.filepath);
            return Err(ApiError::NotFound("File not found on server".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    };

    let mut headers = HeaderMap::new();
    let content_type = file
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&file.file_size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename(&file.original_filename)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Failures mid-stream terminate the connection; headers are long gone.
    let body = Body::from_stream(ReaderStream::new(handle));
    Ok((StatusCode::OK, headers, body).into_response())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii() && c != '"' && c != '\\' && !c.is_ascii_control() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── File queries ────────────────────────────────────────────────────────

/// GET /api/files/info/{share_link} — public metadata, no payment needed.
pub async fn get_file_info(
    State(state): State<AppState>,
    Path(share_link): Path<String>,
) -> Result<Json<FileInfoResponse>, ApiError> {
    let file = state
        .db
        .get_file_by_share_link(&share_link)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let expiry = parse_ts(&file.expiry_date).map_err(ApiError::Internal)?;
    if links::is_expired(expiry, Utc::now()) {
        return Err(ApiError::Expired("File has expired".to_string()));
    }

    Ok(Json(FileInfoResponse {
        success: true,
        data: file_info(&file)?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// GET /api/files/all — listing for admin/debug use.
pub async fn get_all_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let rows = state
        .db
        .get_all_files(query.limit.unwrap_or(100))
        .map_err(ApiError::Internal)?;
    let data = rows
        .iter()
        .map(file_info)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(FileListResponse {
        success: true,
        count: data.len(),
        data,
    }))
}

/// GET /api/files/{file_id}/transactions — audit events for one file.
pub async fn get_file_transactions(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    state
        .db
        .get_file_by_id(&file_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let rows = state
        .db
        .get_transactions_by_file_id(&file_id)
        .map_err(ApiError::Internal)?;
    let data = rows
        .iter()
        .map(transaction_entry)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(TransactionListResponse {
        success: true,
        count: data.len(),
        data,
    }))
}

// ── Payments ────────────────────────────────────────────────────────────

/// POST /api/payments/initiate — file + payment summary for a pending file.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<PaymentResponse<InitiatePaymentData>>, ApiError> {
    let file_id = request.file_id.to_string();
    let file = state
        .db
        .get_file_by_id(&file_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    if file.payment_status == PaymentStatus::Completed.as_str() {
        return Err(ApiError::Validation("Payment already completed".to_string()));
    }
    let expiry = parse_ts(&file.expiry_date).map_err(ApiError::Internal)?;
    if links::is_expired(expiry, Utc::now()) {
        return Err(ApiError::Expired("File has expired".to_string()));
    }

    let payment = latest_or_new_pending_payment(&state.db, &file)?;

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment initiated".to_string(),
        data: InitiatePaymentData {
            file_id: request.file_id,
            filename: file.original_filename.clone(),
            price: parse_decimal(&file.price_usd)?,
            duration: file.duration_days,
            share_link: file.share_link.clone(),
            payment_id: parse_uuid(&payment.id)?,
            payment_status: parse_status(&payment.payment_status)?,
        },
    }))
}

/// POST /api/payments/complete — promote a pending payment after the
/// client's x402 payment went through.
pub async fn complete_payment(
    State(state): State<AppState>,
    Json(request): Json<CompletePaymentRequest>,
) -> Result<Json<PaymentResponse<CompletePaymentData>>, ApiError> {
    let file_id = request.file_id.to_string();
    let file = state
        .db
        .get_file_by_id(&file_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    if file.payment_status == PaymentStatus::Completed.as_str() {
        return Err(ApiError::Validation("Payment already completed".to_string()));
    }

    let payment = latest_or_new_pending_payment(&state.db, &file)?;
    let payment_data = request
        .payment_data
        .as_ref()
        .and_then(|v| serde_json::to_string(v).ok());
    state
        .db
        .complete_payment(
            &payment.id,
            Some(&request.transaction_hash),
            payment_data.as_deref(),
        )
        .map_err(ApiError::Internal)?;
    state
        .db
        .complete_file_payment(&file.id)
        .map_err(ApiError::Internal)?;

    let event = json!({
        "transactionHash": request.transaction_hash,
        "amount": file.price_usd,
        "paymentData": request.payment_data,
    });
    state
        .db
        .create_transaction(
            &Uuid::new_v4().to_string(),
            &file.id,
            Some(&payment.id),
            EventType::PaymentCompleted.as_str(),
            Some(&event.to_string()),
        )
        .map_err(ApiError::Internal)?;

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment completed successfully".to_string(),
        data: CompletePaymentData {
            file_id: request.file_id,
            share_link: file.share_link.clone(),
            payment_status: PaymentStatus::Completed,
        },
    }))
}

/// GET /api/payments/status/{file_id} — read-only payment state.
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<PaymentResponse<PaymentStatusData>>, ApiError> {
    let file = state
        .db
        .get_file_by_id(&file_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let payment = state
        .db
        .get_payment_by_file_id(&file_id)
        .map_err(ApiError::Internal)?;

    let (amount, transaction_hash, paid_at) = match &payment {
        Some(payment) => (
            parse_decimal(&payment.amount_usd)?,
            payment.transaction_hash.clone(),
            payment
                .paid_at
                .as_deref()
                .map(parse_ts)
                .transpose()
                .map_err(ApiError::Internal)?,
        ),
        None => (parse_decimal(&file.price_usd)?, None, None),
    };

    Ok(Json(PaymentResponse {
        success: true,
        message: "Payment status".to_string(),
        data: PaymentStatusData {
            file_id: parse_uuid(&file.id)?,
            payment_status: parse_status(&file.payment_status)?,
            amount,
            transaction_hash,
            paid_at,
        },
    }))
}

// ── Admin / health ──────────────────────────────────────────────────────

/// POST /api/admin/cleanup — on-demand reaper pass with a structured result.
pub async fn admin_cleanup(
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let report = reaper::run_cleanup(&state.db, &state.storage, state.pending_grace)
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Deleted {} expired files", report.deleted_count),
        deleted_count: report.deleted_count,
        errors: report.errors,
    }))
}

/// GET /api/health — liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Server is running".to_string(),
        timestamp: Utc::now(),
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn request_resource(headers: &HeaderMap, path: &str) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}{}", proto, host, path)
}

fn verification_error(err: GateError, accepts: Vec<PaymentRequirements>) -> ApiError {
    match err {
        GateError::VerificationRejected { reason, payer } => ApiError::VerificationFailed {
            reason,
            payer,
            accepts,
        },
        other => ApiError::VerificationFailed {
            reason: other.to_string(),
            payer: None,
            accepts,
        },
    }
}

fn settlement_error(err: GateError, accepts: Vec<PaymentRequirements>) -> ApiError {
    match err {
        GateError::SettlementRejected { reason } => ApiError::SettlementFailed { reason, accepts },
        other => ApiError::SettlementFailed {
            reason: other.to_string(),
            accepts,
        },
    }
}

fn latest_or_new_pending_payment(
    db: &Database,
    file: &FileRow,
) -> Result<paydrop_db::models::PaymentRow, ApiError> {
    match db
        .get_payment_by_file_id(&file.id)
        .map_err(ApiError::Internal)?
    {
        Some(payment) => Ok(payment),
        None => db
            .create_payment(&NewPayment {
                id: &Uuid::new_v4().to_string(),
                file_id: &file.id,
                amount_usd: &file.price_usd,
                payment_status: PaymentStatus::Pending.as_str(),
                transaction_hash: None,
                payment_data: None,
            })
            .map_err(ApiError::Internal),
    }
}

fn file_info(row: &FileRow) -> Result<FileInfo, ApiError> {
    Ok(FileInfo {
        file_id: parse_uuid(&row.id)?,
        filename: row.original_filename.clone(),
        size: row.file_size,
        mime_type: row.mime_type.clone(),
        duration: row.duration_days,
        price: parse_decimal(&row.price_usd)?,
        share_link: row.share_link.clone(),
        expiry_date: parse_ts(&row.expiry_date).map_err(ApiError::Internal)?,
        payment_status: parse_status(&row.payment_status)?,
        created_at: Some(parse_ts(&row.created_at).map_err(ApiError::Internal)?),
    })
}

fn transaction_entry(row: &TransactionRow) -> Result<TransactionEntry, ApiError> {
    Ok(TransactionEntry {
        id: parse_uuid(&row.id)?,
        file_id: parse_uuid(&row.file_id)?,
        payment_id: row.payment_id.as_deref().map(parse_uuid).transpose()?,
        event_type: row.event_type.clone(),
        event_data: row
            .event_data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        created_at: parse_ts(&row.created_at).map_err(ApiError::Internal)?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::Internal(anyhow!("bad uuid {:?}: {}", raw, e)))
}

fn parse_decimal(raw: &str) -> Result<Decimal, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::Internal(anyhow!("bad decimal {:?}: {}", raw, e)))
}

fn parse_status(raw: &str) -> Result<PaymentStatus, ApiError> {
    PaymentStatus::parse(raw)
        .ok_or_else(|| ApiError::Internal(anyhow!("bad payment status {:?}", raw)))
}
