//! PostgREST table client.

use crate::config::BackendConfig;
use crate::error::{status_error, ClientError};
use crate::rows::{
    ChatRow, InsertedId, LapPatchBody, LapRow, NewChatBody, NewLapBody, ReturnConfirmationBody,
    ReturnRow, CHAT_TABLE, LAPS_TABLE, RETURNS_TABLE,
};
use async_trait::async_trait;
use fieldops_core::chat::{ChatMessage, NewChatMessage};
use fieldops_core::error::FieldOpsResult;
use fieldops_core::identity::{LapId, LocalDate, VehicleId};
use fieldops_core::lap::{Lap, LapPatch, NewLap};
use fieldops_core::ports::{ChatStore, ReturnStore, RouteStore};
use fieldops_core::returns::{ReturnConfirmation, ReturnRecord};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;

const LAP_ORDER: &str = "numero_vuelta.asc,hora_citacion.asc";

/// Build the `apikey` and bearer headers every backend request carries.
pub(crate) fn build_auth_headers(config: &BackendConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(&config.anon_key).map_err(|e| ClientError::Config(e.to_string()))?,
    );
    let bearer = format!("Bearer {}", config.anon_key);
    headers.insert(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&bearer).map_err(|e| ClientError::Config(e.to_string()))?,
    );
    Ok(headers)
}

pub(crate) fn build_http_client(config: &BackendConfig) -> Result<reqwest::Client, ClientError> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Read the body, mapping non-success statuses to [`ClientError::Status`].
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        Ok(text)
    } else {
        Err(status_error(status.as_u16(), &text))
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[derive(Clone)]
pub struct PostgrestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl PostgrestClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url().to_string(),
            auth_header: build_auth_headers(config)?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ClientError> {
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.auth_header.clone())
            .query(query)
            .send()
            .await?;
        let text = read_body(response).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn patch<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        filter: (&str, String),
        body: &B,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .patch(self.table_url(table))
            .headers(self.auth_header.clone())
            .header("prefer", "return=minimal")
            .query(&[filter])
            .json(body)
            .send()
            .await?;
        read_body(response).await?;
        Ok(())
    }

    async fn insert<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        body: &B,
        prefer: &'static str,
    ) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.auth_header.clone())
            .header("prefer", prefer)
            .json(body)
            .send()
            .await?;
        read_body(response).await
    }

    async fn fetch_laps(&self, vehicle: &VehicleId, date: LocalDate) -> Result<Vec<Lap>, ClientError> {
        let rows: Vec<LapRow> = self
            .select(
                LAPS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("patente", eq(vehicle)),
                    ("fecha", eq(date)),
                    ("order", LAP_ORDER.to_string()),
                ],
            )
            .await?;
        rows.into_iter().map(Lap::try_from).collect()
    }

    async fn insert_lap_row(&self, lap: &NewLap) -> Result<LapId, ClientError> {
        let text = self
            .insert(LAPS_TABLE, &NewLapBody::from(lap), "return=representation")
            .await?;
        let inserted: Vec<InsertedId> = serde_json::from_str(&text)?;
        inserted
            .first()
            .map(|row| LapId(row.id))
            .ok_or_else(|| ClientError::InvalidResponse("insert returned no row".to_string()))
    }

    async fn fetch_messages(&self, vehicle: &VehicleId, limit: usize) -> Result<Vec<ChatMessage>, ClientError> {
        let rows: Vec<ChatRow> = self
            .select(
                CHAT_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("patente", eq(vehicle)),
                    ("order", "id.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        rows.into_iter().map(ChatMessage::try_from).collect()
    }
}

#[async_trait]
impl RouteStore for PostgrestClient {
    async fn list_laps(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<Vec<Lap>> {
        let laps = self
            .fetch_laps(vehicle, date)
            .await
            .map_err(|e| e.into_field_ops(LAPS_TABLE))?;
        tracing::debug!(vehicle = %vehicle, %date, count = laps.len(), "Fetched laps");
        Ok(laps)
    }

    async fn probe_route(&self, vehicle: &VehicleId, date: LocalDate) -> FieldOpsResult<bool> {
        let rows: Vec<serde_json::Value> = self
            .select(
                LAPS_TABLE,
                &[
                    ("select", "id".to_string()),
                    ("patente", eq(vehicle)),
                    ("fecha", eq(date)),
                    ("limit", "1".to_string()),
                ],
            )
            .await
            .map_err(|e| e.into_field_ops(LAPS_TABLE))?;
        Ok(!rows.is_empty())
    }

    async fn update_lap(&self, id: LapId, patch: &LapPatch) -> FieldOpsResult<()> {
        self.patch(LAPS_TABLE, ("id", eq(id)), &LapPatchBody::from(patch))
            .await
            .map_err(|e| e.into_field_ops(LAPS_TABLE))
    }

    async fn insert_lap(&self, lap: &NewLap) -> FieldOpsResult<LapId> {
        self.insert_lap_row(lap)
            .await
            .map_err(|e| e.into_field_ops(LAPS_TABLE))
    }
}

#[async_trait]
impl ChatStore for PostgrestClient {
    async fn recent_messages(
        &self,
        vehicle: &VehicleId,
        limit: usize,
    ) -> FieldOpsResult<Vec<ChatMessage>> {
        self.fetch_messages(vehicle, limit)
            .await
            .map_err(|e| e.into_field_ops(CHAT_TABLE))
    }

    async fn insert_message(&self, message: &NewChatMessage) -> FieldOpsResult<()> {
        self.insert(CHAT_TABLE, &NewChatBody::from(message), "return=minimal")
            .await
            .map(|_| ())
            .map_err(|e| e.into_field_ops(CHAT_TABLE))
    }
}

#[async_trait]
impl ReturnStore for PostgrestClient {
    async fn find_return(&self, key: &str) -> FieldOpsResult<Option<ReturnRecord>> {
        let rows: Vec<ReturnRow> = self
            .select(
                RETURNS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("key", eq(key)),
                    ("limit", "1".to_string()),
                ],
            )
            .await
            .map_err(|e| e.into_field_ops(RETURNS_TABLE))?;
        Ok(rows.into_iter().next().map(ReturnRecord::from))
    }

    async fn confirm_return(
        &self,
        key: &str,
        confirmation: &ReturnConfirmation,
    ) -> FieldOpsResult<()> {
        let body = ReturnConfirmationBody::try_from(confirmation)
            .map_err(|e| e.into_field_ops(RETURNS_TABLE))?;
        self.patch(RETURNS_TABLE, ("key", eq(key)), &body)
            .await
            .map_err(|e| e.into_field_ops(RETURNS_TABLE))
    }
}
