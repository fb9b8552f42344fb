use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use common_auth::{AuthError, AuthSource, LoginOutcome};
use common_obs::autotest_checks_total;

use crate::error::AutotestError;
use crate::render::Report;
use crate::AppState;

pub const SOURCE_ID_PARAM: &str = "SourceID";

/// Raw query pairs in request order; repeated keys are kept.
type QueryParams = Result<Query<Vec<(String, String)>>, QueryRejection>;

pub async fn attributes(
    State(state): State<Arc<AppState>>,
    query: QueryParams,
) -> Result<Report, AutotestError> {
    observe("attributes", check_attributes(&state, query).await)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    query: QueryParams,
) -> Result<Report, AutotestError> {
    observe("login", check_login(&state, query).await)
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    query: QueryParams,
) -> Result<Report, AutotestError> {
    observe("logout", check_logout(&state, query).await)
}

async fn check_attributes(state: &AppState, query: QueryParams) -> Result<Report, AutotestError> {
    let source = resolve_source(state, query).await?;
    if !source.is_authenticated().await? {
        return Err(AuthError::NotAuthenticated.into());
    }
    Ok(Report::Ok(source.attributes().await?))
}

async fn check_login(state: &AppState, query: QueryParams) -> Result<Report, AutotestError> {
    let source = resolve_source(state, query).await?;
    if !source.is_authenticated().await? {
        if let LoginOutcome::Redirect { location } = source.require_auth().await? {
            return Ok(Report::Redirect { location });
        }
    }
    Ok(Report::ok())
}

async fn check_logout(state: &AppState, query: QueryParams) -> Result<Report, AutotestError> {
    let source = resolve_source(state, query).await?;
    if source.is_authenticated().await? {
        source.logout().await?;
    }
    Ok(Report::ok())
}

async fn resolve_source(
    state: &AppState,
    query: QueryParams,
) -> Result<Box<dyn AuthSource>, AutotestError> {
    let Query(pairs) = query.map_err(|rejection| AutotestError::BadRequest {
        reason: rejection.body_text(),
    })?;
    let source_id = source_id_param(pairs).ok_or_else(AutotestError::missing_source_id)?;
    Ok(state.sources.create(&source_id).await?)
}

/// The last `SourceID` value wins when the parameter is repeated.
fn source_id_param(pairs: Vec<(String, String)>) -> Option<String> {
    pairs
        .into_iter()
        .rev()
        .find(|(key, _)| key == SOURCE_ID_PARAM)
        .map(|(_, value)| value)
}

fn observe(
    endpoint: &'static str,
    result: Result<Report, AutotestError>,
) -> Result<Report, AutotestError> {
    match &result {
        Ok(report) => {
            tracing::debug!(endpoint, outcome = report.outcome(), "check passed");
            autotest_checks_total().inc(&[endpoint, report.outcome()], 1);
        }
        Err(error) => {
            tracing::debug!(endpoint, %error, "check failed");
            autotest_checks_total().inc(&[endpoint, "error"], 1);
        }
    }
    result
}
