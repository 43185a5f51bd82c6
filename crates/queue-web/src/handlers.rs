//! HTTP处理器

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use queue_core::{
    utils::{parse_id, parse_queue_date},
    PageRequest, QueueError, QueueFilter, QueuePage, QueueRecord, QueueSort, QueueStatus,
    SortField, SortOrder,
};
use queue_workflow::{CreateQueueRequest, ImportReport};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus指标
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, QueueError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| QueueError::Validation(format!("{} is required", field)))
}

/// 新建排队请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueBody {
    pub registration_id: Option<String>,
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub queue_date: Option<String>,
}

impl CreateQueueBody {
    fn into_request(self) -> Result<CreateQueueRequest, QueueError> {
        Ok(CreateQueueRequest {
            registration_id: parse_id("registrationId", required("registrationId", &self.registration_id)?)?,
            patient_id: parse_id("patientId", required("patientId", &self.patient_id)?)?,
            doctor_id: parse_id("doctorId", required("doctorId", &self.doctor_id)?)?,
            queue_date: parse_queue_date(required("queueDate", &self.queue_date)?)?,
        })
    }
}

/// 医生和日期
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionParams {
    pub doctor_id: Option<String>,
    pub queue_date: Option<String>,
}

impl PartitionParams {
    pub fn parse(&self) -> Result<(uuid::Uuid, chrono::NaiveDate), QueueError> {
        Ok((
            parse_id("doctorId", required("doctorId", &self.doctor_id)?)?,
            parse_queue_date(required("queueDate", &self.queue_date)?)?,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQueueParams {
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub queue_date: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListQueueParams {
    fn parse(&self) -> Result<(QueueFilter, PageRequest, QueueSort), QueueError> {
        let filter = QueueFilter {
            doctor_id: self.doctor_id.as_deref().map(|v| parse_id("doctorId", v)).transpose()?,
            patient_id: self.patient_id.as_deref().map(|v| parse_id("patientId", v)).transpose()?,
            queue_date: self.queue_date.as_deref().map(parse_queue_date).transpose()?,
            status: self.status.as_deref().map(str::parse::<QueueStatus>).transpose()?,
        };
        let page = PageRequest::new(self.page, self.limit)?;
        let sort = QueueSort {
            field: self.sort_by.as_deref().map(str::parse::<SortField>).transpose()?,
            order: self.sort_order.as_deref().map(str::parse::<SortOrder>).transpose()?,
        };
        Ok((filter, page, sort))
    }
}

#[derive(Debug, Deserialize)]
pub struct PopulateParams {
    pub populate: Option<bool>,
}

/// 挂号入队
pub async fn create_queue(
    State(state): State<AppState>,
    body: Result<Json<CreateQueueBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<QueueRecord>)> {
    let Json(body) = body?;
    let request = body.into_request()?;
    let record = state.engine.create(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 分页查询
pub async fn list_queues(
    State(state): State<AppState>,
    params: Result<Query<ListQueueParams>, QueryRejection>,
) -> ApiResult<Json<QueuePage>> {
    let Query(params) = params?;
    let (filter, page, sort) = params.parse()?;
    Ok(Json(state.engine.list(&filter, &page, &sort).await?))
}

/// 按ID查询，`populate=true` 时带出患者和医生摘要
pub async fn get_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<PopulateParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params?;
    let id = parse_id("id", &id)?;
    if params.populate.unwrap_or(false) {
        Ok(Json(state.engine.get_view(id).await?).into_response())
    } else {
        Ok(Json(state.engine.get_by_id(id).await?).into_response())
    }
}

/// 当前就诊记录，没有时返回 null
pub async fn get_current(
    State(state): State<AppState>,
    params: Result<Query<PartitionParams>, QueryRejection>,
) -> ApiResult<Json<Option<QueueRecord>>> {
    let Query(params) = params?;
    let (doctor_id, queue_date) = params.parse()?;
    Ok(Json(state.engine.get_current(doctor_id, queue_date).await?))
}

pub async fn list_by_doctor_date(
    State(state): State<AppState>,
    Path((doctor_id, queue_date)): Path<(String, String)>,
) -> ApiResult<Json<Vec<QueueRecord>>> {
    let doctor_id = parse_id("doctorId", &doctor_id)?;
    let queue_date = parse_queue_date(&queue_date)?;
    Ok(Json(state.engine.list_by_doctor_date(doctor_id, queue_date).await?))
}

/// 叫号
pub async fn call_next(
    State(state): State<AppState>,
    body: Result<Json<PartitionParams>, JsonRejection>,
) -> ApiResult<Json<QueueRecord>> {
    let Json(body) = body?;
    let (doctor_id, queue_date) = body.parse()?;
    Ok(Json(state.engine.call_next(doctor_id, queue_date).await?))
}

/// 过号
pub async fn skip_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<QueueRecord>> {
    let id = parse_id("id", &id)?;
    Ok(Json(state.engine.skip(id).await?))
}

/// 批量导入，请求体为条目数组
pub async fn bulk_import(
    State(state): State<AppState>,
    body: Result<Json<Vec<Value>>, JsonRejection>,
) -> ApiResult<Json<ImportReport>> {
    let Json(items) = body?;
    if items.is_empty() {
        return Err(ApiError(QueueError::Validation(
            "import batch must not be empty".to_string(),
        )));
    }
    info!(items = items.len(), "Bulk import requested");
    Ok(Json(state.engine.bulk_import(items).await))
}
