//! Abuse reports against a listing or a user.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use sokoni_types::api::CreateReportRequest;
use sokoni_types::models::Report;

use crate::context::SessionContext;
use crate::error::{GatewayError, Notice, Recovery};
use crate::gateway::Gateway;

#[derive(Debug, Clone, Default)]
pub struct ReportDraft {
    pub product_id: Option<Uuid>,
    pub reported_user_id: Option<Uuid>,
    pub reason: String,
    pub details: Option<String>,
}

impl ReportDraft {
    fn into_request(self) -> CreateReportRequest {
        let details = self.details.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        CreateReportRequest {
            product_id: self.product_id,
            reported_user_id: self.reported_user_id,
            reason: self.reason.trim().to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Filed(Report),
    /// The same reporter already reported this target.
    AlreadyFiled,
    /// The listing was gone; the report was filed against the user only.
    FiledWithoutListing(Report),
}

impl ReportOutcome {
    pub fn notice(&self) -> Notice {
        match self {
            Self::Filed(_) => Notice::success("Report submitted. Thank you for keeping Sokoni safe."),
            Self::AlreadyFiled => Notice::info("You have already reported this"),
            Self::FiledWithoutListing(_) => {
                Notice::success("The listing has been removed, so your report was filed against the seller.")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Please choose a reason for the report")]
    EmptyReason,

    #[error("Nothing to report")]
    NoTarget,

    #[error("This listing no longer exists")]
    ListingGone,

    #[error("This user no longer exists")]
    UserGone,

    #[error("Failed to submit report")]
    Gateway(#[source] GatewayError),
}

impl ReportError {
    pub fn notice(&self) -> Notice {
        match self {
            Self::EmptyReason | Self::NoTarget => Notice::warning(self.to_string()),
            Self::Gateway(e) => Notice::from_gateway(e, "Failed to submit report"),
            _ => Notice::error(self.to_string()),
        }
    }
}

pub struct ReportDesk {
    gateway: Arc<dyn Gateway>,
}

impl ReportDesk {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// File a report. A missing listing is retried once against the user
    /// alone; no other failure is retried.
    pub async fn submit(&self, ctx: &SessionContext, draft: ReportDraft) -> Result<ReportOutcome, ReportError> {
        if draft.reason.trim().is_empty() {
            return Err(ReportError::EmptyReason);
        }
        if draft.product_id.is_none() && draft.reported_user_id.is_none() {
            return Err(ReportError::NoTarget);
        }

        let request = draft.into_request();
        let err = match self.gateway.insert_report(ctx.user_id, request.clone()).await {
            Ok(report) => {
                info!("Report {} filed by {}", report.id, ctx.user_id);
                return Ok(ReportOutcome::Filed(report));
            }
            Err(e) => e,
        };

        match err.recovery() {
            Recovery::AlreadyExists => Ok(ReportOutcome::AlreadyFiled),
            Recovery::RetryNarrower => self.retry_without_listing(ctx, request, err).await,
            _ => {
                warn!("Report by {} failed: {}", ctx.user_id, err);
                Err(ReportError::Gateway(err))
            }
        }
    }

    async fn retry_without_listing(
        &self,
        ctx: &SessionContext,
        request: CreateReportRequest,
        err: GatewayError,
    ) -> Result<ReportOutcome, ReportError> {
        let Some(product_id) = request.product_id else {
            return Err(ReportError::UserGone);
        };
        if request.reported_user_id.is_none() {
            return Err(ReportError::ListingGone);
        }

        warn!("Product {} missing for report ({}), retrying without it", product_id, err);
        let narrower = CreateReportRequest {
            product_id: None,
            ..request
        };
        match self.gateway.insert_report(ctx.user_id, narrower).await {
            Ok(report) => Ok(ReportOutcome::FiledWithoutListing(report)),
            Err(e) => match e.recovery() {
                Recovery::AlreadyExists => Ok(ReportOutcome::AlreadyFiled),
                Recovery::RetryNarrower => Err(ReportError::UserGone),
                _ => Err(ReportError::Gateway(e)),
            },
        }
    }
}
