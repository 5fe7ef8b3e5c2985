//! Table row shapes and their conversion to and from domain types.
//!
//! Timestamps arrive in several shapes depending on who wrote the row. They
//! are normalised here so the domain only ever sees UTC instants.

use crate::error::ClientError;
use chrono::{
    DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use fieldops_core::chat::{ChatMessage, NewChatMessage, Sender};
use fieldops_core::identity::{Coordinates, LapId, LocalDate, MessageId, Timestamp, VehicleId};
use fieldops_core::lap::{Lap, LapPatch, NewLap};
use fieldops_core::returns::{ReturnConfirmation, ReturnRecord};
use fieldops_core::sync::{DispatchFields, LapChange};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LAPS_TABLE: &str = "asignaciones_transporte";
pub const CHAT_TABLE: &str = "mensajes_chat";
pub const RETURNS_TABLE: &str = "devoluciones_bodega";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M", "%I:%M %p"];

fn invalid(field: &str, raw: &str) -> ClientError {
    ClientError::InvalidResponse(format!("unparseable {}: {:?}", field, raw))
}

/// RFC 3339, Postgres text output, or naive ISO (read as UTC).
pub fn parse_instant(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}

/// A checkpoint timestamp. A bare time of day is taken on `date` in local time.
pub fn parse_checkpoint(raw: &str, date: LocalDate) -> Option<Timestamp> {
    parse_instant(raw).or_else(|| {
        let time = parse_time_of_day(raw)?;
        let naive = date.and_time(time);
        Some(match Local.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => naive.and_utc(),
        })
    })
}

pub fn format_instant(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Coordinates are stored as text; numbers are accepted too.
fn parse_coordinate(field: &str, value: &Value) -> Result<Option<f64>, ClientError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| invalid(field, &n.to_string())),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| invalid(field, s)),
        other => Err(invalid(field, &other.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// LAPS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LapRow {
    pub id: i64,
    pub fecha: NaiveDate,
    pub patente: String,
    #[serde(default)]
    pub nodo: Option<String>,
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub hora_citacion: Option<String>,
    #[serde(default)]
    pub numero_vuelta: Option<i64>,
    #[serde(default)]
    pub hora_llegada: Option<String>,
    #[serde(default)]
    pub hora_salida: Option<String>,
    #[serde(default)]
    pub hora_fin_reparto: Option<String>,
    #[serde(default)]
    pub gps_llegada_lat: Value,
    #[serde(default)]
    pub gps_llegada_lon: Value,
    #[serde(default)]
    pub mensaje_admin: Option<String>,
    #[serde(default)]
    pub comentario: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
}

impl TryFrom<LapRow> for Lap {
    type Error = ClientError;

    fn try_from(row: LapRow) -> Result<Self, Self::Error> {
        let date = row.fecha;
        let checkpoint = |field: &str, raw: Option<String>| -> Result<Option<Timestamp>, ClientError> {
            match non_empty(raw) {
                Some(raw) => parse_checkpoint(&raw, date)
                    .map(Some)
                    .ok_or_else(|| invalid(field, &raw)),
                None => Ok(None),
            }
        };

        let vehicle_id = VehicleId::parse(&row.patente)
            .map_err(|_| invalid("patente", &row.patente))?;
        // Citation times are typed by dispatch; an unreadable one sorts last.
        let scheduled_time = non_empty(row.hora_citacion).and_then(|raw| {
            let parsed = parse_time_of_day(&raw);
            if parsed.is_none() {
                tracing::warn!(lap_id = row.id, hora_citacion = %raw, "Ignoring unparseable citation time");
            }
            parsed
        });
        let lap_number = match row.numero_vuelta {
            None => 1,
            Some(n) => u32::try_from(n)
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| invalid("numero_vuelta", &n.to_string()))?,
        };

        let latitude = parse_coordinate("gps_llegada_lat", &row.gps_llegada_lat)?;
        let longitude = parse_coordinate("gps_llegada_lon", &row.gps_llegada_lon)?;
        let arrival_position = match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        };

        Ok(Lap {
            id: LapId(row.id),
            date,
            vehicle_id,
            node: non_empty(row.nodo),
            site: non_empty(row.local),
            scheduled_time,
            lap_number,
            arrived_at: checkpoint("hora_llegada", row.hora_llegada)?,
            departed_at: checkpoint("hora_salida", row.hora_salida)?,
            completed_at: checkpoint("hora_fin_reparto", row.hora_fin_reparto)?,
            arrival_position,
            dispatcher_message: row.mensaje_admin,
            dispatcher_comment: row.comentario,
            status: row.estado,
        })
    }
}

/// Body of a single-row checkpoint update. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapPatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hora_llegada: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_llegada_lat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_llegada_lon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hora_salida: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hora_fin_reparto: Option<String>,
}

impl From<&LapPatch> for LapPatchBody {
    fn from(patch: &LapPatch) -> Self {
        Self {
            hora_llegada: patch.arrived_at.map(format_instant),
            gps_llegada_lat: patch.arrival_position.map(|p| p.latitude.to_string()),
            gps_llegada_lon: patch.arrival_position.map(|p| p.longitude.to_string()),
            hora_salida: patch.departed_at.map(format_instant),
            hora_fin_reparto: patch.completed_at.map(format_instant),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewLapBody {
    pub fecha: NaiveDate,
    pub patente: String,
    pub nodo: Option<String>,
    pub local: Option<String>,
    pub hora_citacion: String,
    pub numero_vuelta: u32,
    pub estado: String,
    pub hora_llegada: String,
    pub gps_llegada_lat: String,
    pub gps_llegada_lon: String,
    pub hora_salida: Option<String>,
    pub hora_fin_reparto: Option<String>,
}

impl From<&NewLap> for NewLapBody {
    fn from(lap: &NewLap) -> Self {
        Self {
            fecha: lap.date,
            patente: lap.vehicle_id.to_string(),
            nodo: lap.node.clone(),
            local: lap.site.clone(),
            hora_citacion: format_time_of_day(lap.scheduled_time),
            numero_vuelta: lap.lap_number,
            estado: lap.status.clone(),
            hora_llegada: format_instant(lap.arrived_at),
            gps_llegada_lat: lap.arrival_position.latitude.to_string(),
            gps_llegada_lon: lap.arrival_position.longitude.to_string(),
            hora_salida: None,
            hora_fin_reparto: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InsertedId {
    pub id: i64,
}

/// Lenient view of a lap row inside a change payload. `old_record` may
/// carry only the primary key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LapChangeRow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub patente: Option<String>,
    #[serde(default)]
    pub mensaje_admin: Option<String>,
    #[serde(default)]
    pub comentario: Option<String>,
}

impl LapChangeRow {
    fn dispatch_fields(&self) -> DispatchFields {
        DispatchFields {
            message: self.mensaje_admin.clone(),
            comment: self.comentario.clone(),
        }
    }
}

/// Build a change event from a `postgres_changes` UPDATE payload.
///
/// `fallback` tags events whose rows do not name the vehicle.
pub fn lap_change_from_records(
    record: &Value,
    old_record: &Value,
    fallback: &VehicleId,
) -> Result<LapChange, ClientError> {
    let current: LapChangeRow = serde_json::from_value(record.clone())?;
    let previous: LapChangeRow = match old_record {
        Value::Null => LapChangeRow::default(),
        other => serde_json::from_value(other.clone())?,
    };
    let vehicle_id = match current.patente.as_deref().or(previous.patente.as_deref()) {
        Some(raw) => VehicleId::parse(raw).map_err(|_| invalid("patente", raw))?,
        None => fallback.clone(),
    };
    Ok(LapChange {
        vehicle_id,
        lap_id: current.id.or(previous.id).map(LapId),
        previous: previous.dispatch_fields(),
        current: current.dispatch_fields(),
    })
}

// ============================================================================
// CHAT
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRow {
    pub id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    pub patente: String,
    pub remitente: String,
    #[serde(default)]
    pub contenido: Option<String>,
    #[serde(default)]
    pub url_imagen: Option<String>,
}

impl TryFrom<ChatRow> for ChatMessage {
    type Error = ClientError;

    fn try_from(row: ChatRow) -> Result<Self, Self::Error> {
        let vehicle_id = VehicleId::parse(&row.patente)
            .map_err(|_| invalid("patente", &row.patente))?;
        // Anything not written by the driver app came from dispatch.
        let sender = if row.remitente == Sender::Driver.wire_name() {
            Sender::Driver
        } else {
            Sender::Dispatch
        };
        Ok(ChatMessage {
            id: MessageId(row.id),
            created_at: row.created_at.as_deref().and_then(parse_instant),
            vehicle_id,
            sender,
            body: row.contenido.unwrap_or_default(),
            image_url: non_empty(row.url_imagen),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewChatBody {
    pub patente: String,
    pub remitente: &'static str,
    pub contenido: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_imagen: Option<String>,
}

impl From<&NewChatMessage> for NewChatBody {
    fn from(message: &NewChatMessage) -> Self {
        Self {
            patente: message.vehicle_id.to_string(),
            remitente: message.sender.wire_name(),
            contenido: message.body.clone(),
            url_imagen: message.image_url.clone(),
        }
    }
}

// ============================================================================
// RETURNS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnRow {
    pub key: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sg: Value,
    #[serde(default)]
    pub foto_url: Option<String>,
    #[serde(default)]
    pub fotos_adicionales: Value,
    #[serde(default)]
    pub confirmed_at: Option<String>,
    #[serde(default)]
    pub confirmed_source: Option<String>,
}

/// Columns holding lists arrive either as JSON arrays or as JSON text.
fn list_as_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl From<ReturnRow> for ReturnRecord {
    fn from(row: ReturnRow) -> Self {
        let extra_photo_urls = list_as_text(row.fotos_adicionales)
            .map(|text| fieldops_core::returns::parse_sg_codes(&text))
            .unwrap_or_default();
        ReturnRecord {
            key: row.key,
            status: row.status,
            sg: list_as_text(row.sg),
            photo_url: non_empty(row.foto_url),
            extra_photo_urls,
            confirmed_at: row.confirmed_at.as_deref().and_then(parse_instant),
            confirmed_source: row.confirmed_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnConfirmationBody {
    pub status: String,
    pub foto_url: String,
    /// JSON text, not a JSON array.
    pub fotos_adicionales: String,
    pub confirmed_at: String,
    pub confirmed_source: String,
}

impl TryFrom<&ReturnConfirmation> for ReturnConfirmationBody {
    type Error = ClientError;

    fn try_from(confirmation: &ReturnConfirmation) -> Result<Self, Self::Error> {
        Ok(Self {
            status: confirmation.status.clone(),
            foto_url: confirmation.photo_url.clone(),
            fotos_adicionales: serde_json::to_string(&confirmation.extra_photo_urls)?,
            confirmed_at: format_instant(confirmation.confirmed_at),
            confirmed_source: confirmation.confirmed_source.clone(),
        })
    }
}
