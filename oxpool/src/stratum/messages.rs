//! Stratum wire messages.
//!
//! Messages are JSON objects, one per line. Three shapes exist on the
//! wire:
//!
//! - **Request**: has `method` and a numeric `id`,
//! - **Notification**: a request whose `id` is null or absent,
//! - **Response**: has `id` plus `result` and/or `error`.
//!
//! Stratum predates JSON-RPC 2.0 and deviates from it freely: there is no
//! version field, notifications carry `id: null`, and errors are a bare
//! `[code, message, data]` triple. A standard JSON-RPC crate fights those
//! conventions, so the envelope here is a small custom enum, the same
//! trade the rest of the ecosystem makes.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use num_rational::BigRational;
use num_traits::ToPrimitive;

use crate::miner::Miner;
use crate::work;

/// Maximum size of one transmitted line, in bytes. Oversize lines are a
/// protocol violation and terminate the connection.
pub const MAX_MESSAGE_SIZE: usize = 250;

// Methods consumed from miners.
pub const AUTHORIZE: &str = "mining.authorize";
pub const SUBSCRIBE: &str = "mining.subscribe";
pub const SUBMIT: &str = "mining.submit";

// Methods emitted to miners.
pub const SET_DIFFICULTY: &str = "mining.set_difficulty";
pub const NOTIFY: &str = "mining.notify";

/// Stratum error kinds recognized by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown,
    StaleJob,
    DuplicateShare,
    LowDifficultyShare,
    UnauthorizedWorker,
    NotSubscribed,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::Unknown => 20,
            ErrorCode::StaleJob => 21,
            ErrorCode::DuplicateShare => 22,
            ErrorCode::LowDifficultyShare => 23,
            ErrorCode::UnauthorizedWorker => 24,
            ErrorCode::NotSubscribed => 25,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "Other/Unknown",
            ErrorCode::StaleJob => "Job not found",
            ErrorCode::DuplicateShare => "Duplicate share",
            ErrorCode::LowDifficultyShare => "Low difficulty share",
            ErrorCode::UnauthorizedWorker => "Unauthorized worker",
            ErrorCode::NotSubscribed => "Not subscribed",
        }
    }
}

/// Error payload carried in responses; `[code, message, data]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumErr {
    pub code: u32,
    pub message: String,
    pub data: Option<Value>,
}

impl StratumErr {
    pub fn new(kind: ErrorCode, data: Option<Value>) -> Self {
        Self {
            code: kind.code(),
            message: kind.message().to_string(),
            data,
        }
    }
}

impl Serialize for StratumErr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.code)?;
        seq.serialize_element(&self.message)?;
        seq.serialize_element(&self.data)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for StratumErr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ErrVisitor;

        impl<'de> Visitor<'de> for ErrVisitor {
            type Value = StratumErr;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a [code, message, data] triple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let code = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let message = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let data = seq.next_element()?.unwrap_or(None);
                Ok(StratumErr {
                    code,
                    message,
                    data,
                })
            }
        }

        deserializer.deserialize_seq(ErrVisitor)
    }
}

/// Classification of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

/// One Stratum wire message.
///
/// Untagged: an object with a `method` decodes as a request (or a
/// notification when `id` is null or absent); anything else with an `id`
/// decodes as a response. Input matching neither shape fails to decode,
/// which callers treat as a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request {
        #[serde(default)]
        id: Option<u64>,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<StratumErr>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request { id: Some(_), .. } => MessageKind::Request,
            Message::Request { id: None, .. } => MessageKind::Notification,
            Message::Response { .. } => MessageKind::Response,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            Message::Request { id, .. } => *id,
            Message::Response { id, .. } => Some(*id),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } => Some(method),
            Message::Response { .. } => None,
        }
    }
}

/// Response to a `mining.authorize` request.
pub fn authorize_response(id: u64, authorized: bool, error: Option<StratumErr>) -> Message {
    Message::Response {
        id,
        result: Value::Bool(authorized),
        error,
    }
}

/// Successful response to a `mining.subscribe` request.
pub fn subscribe_response(
    id: u64,
    notify_id: &str,
    extra_nonce1: &str,
    extra_nonce2_size: u64,
) -> Message {
    Message::Response {
        id,
        result: json!([[NOTIFY, notify_id], extra_nonce1, extra_nonce2_size]),
        error: None,
    }
}

/// Failed response to a `mining.subscribe` request.
pub fn subscribe_error(id: u64, error: StratumErr) -> Message {
    Message::Response {
        id,
        result: Value::Null,
        error: Some(error),
    }
}

/// Response to a `mining.submit` request.
pub fn submit_response(id: u64, accepted: bool, error: Option<StratumErr>) -> Message {
    Message::Response {
        id,
        result: Value::Bool(accepted),
        error,
    }
}

/// `mining.set_difficulty` notification carrying the pool difficulty.
pub fn set_difficulty(difficulty: &BigRational) -> Message {
    let diff = difficulty.to_f64().unwrap_or_default();
    Message::Request {
        id: None,
        method: SET_DIFFICULTY.to_string(),
        params: json!([diff]),
    }
}

/// `mining.notify` notification describing a job.
///
/// The merkle-branch slot is always empty: the generation transaction is
/// part of the template, so miners have nothing to fold in themselves.
#[allow(clippy::too_many_arguments)]
pub fn work_notification(
    job_id: &str,
    prev_block: &str,
    gen_tx1: &str,
    gen_tx2: &str,
    block_version: &str,
    nbits: &str,
    ntime: &str,
    clean_job: bool,
) -> Message {
    Message::Request {
        id: None,
        method: NOTIFY.to_string(),
        params: json!([
            job_id,
            prev_block,
            gen_tx1,
            gen_tx2,
            Vec::<String>::new(),
            block_version,
            nbits,
            ntime,
            clean_job,
        ]),
    }
}

/// Extract the username from `mining.authorize` params.
pub fn parse_authorize(params: &Value) -> Result<String, String> {
    let arr = params
        .as_array()
        .ok_or("authorize params not an array")?;
    let username = arr
        .first()
        .and_then(Value::as_str)
        .ok_or("username not a string")?;
    Ok(username.to_string())
}

/// Extract the user agent and optional notification id from
/// `mining.subscribe` params.
pub fn parse_subscribe(params: &Value) -> Result<(Option<String>, Option<String>), String> {
    let arr = params
        .as_array()
        .ok_or("subscribe params not an array")?;
    let user_agent = match arr.first() {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err("user agent not a string".to_string()),
    };
    let notify_id = match arr.get(1) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err("notification id not a string".to_string()),
    };
    Ok((user_agent, notify_id))
}

/// Parsed and normalized `mining.submit` parameters.
///
/// `ntime` and `nonce` are little-endian hex regardless of what the
/// hardware put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    pub worker: String,
    pub job_id: String,
    pub extra_nonce2: String,
    pub ntime: String,
    pub nonce: String,
}

/// Extract `mining.submit` params, normalizing vendor byte-order quirks.
///
/// Hardware that receives big-endian `nBits`/`nTime` in `mining.notify`
/// echoes big-endian `nTime` and `nonce` here, so both are reversed back
/// before the solved header is reconstructed.
pub fn parse_submit(params: &Value, miner: Miner) -> Result<SubmitParams, String> {
    let arr = params.as_array().ok_or("submit params not an array")?;
    let field = |idx: usize, name: &'static str| -> Result<String, String> {
        arr.get(idx)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("{name} not a string"))
    };

    let worker = field(0, "worker name")?;
    let job_id = field(1, "job id")?;
    let extra_nonce2 = field(2, "extraNonce2")?;
    let mut ntime = field(3, "nTime")?;
    let mut nonce = field(4, "nonce")?;

    if miner.flips_notify_endianness() {
        ntime = work::hex_reversed(&ntime).map_err(|e| e.to_string())?;
        nonce = work::hex_reversed(&nonce).map_err(|e| e.to_string())?;
    }

    Ok(SubmitParams {
        worker,
        job_id,
        extra_nonce2,
        ntime,
        nonce,
    })
}

/// Fields of a `mining.notify` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyParams {
    pub job_id: String,
    pub prev_block: String,
    pub gen_tx1: String,
    pub gen_tx2: String,
    pub block_version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_job: bool,
}

/// Extract the fields of a `mining.notify` message, as produced by
/// [`work_notification`].
pub fn parse_work_notification(params: &Value) -> Result<NotifyParams, String> {
    let arr = params.as_array().ok_or("notify params not an array")?;
    let field = |idx: usize, name: &'static str| -> Result<String, String> {
        arr.get(idx)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("{name} not a string"))
    };

    Ok(NotifyParams {
        job_id: field(0, "job id")?,
        prev_block: field(1, "prev block")?,
        gen_tx1: field(2, "genesis tx 1")?,
        gen_tx2: field(3, "genesis tx 2")?,
        block_version: field(5, "block version")?,
        nbits: field(6, "nBits")?,
        ntime: field(7, "nTime")?,
        clean_job: arr
            .get(8)
            .and_then(Value::as_bool)
            .ok_or("clean job not a bool")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_request() {
        let msg: Message =
            serde_json::from_str(r#"{"id":1,"method":"mining.authorize","params":["u","p"]}"#)
                .unwrap();
        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(msg.id(), Some(1));
        assert_eq!(msg.method(), Some(AUTHORIZE));
    }

    #[test]
    fn classify_notification() {
        let msg: Message =
            serde_json::from_str(r#"{"id":null,"method":"mining.notify","params":[]}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Notification);
        assert_eq!(msg.id(), None);

        // An absent id is also a notification.
        let msg: Message =
            serde_json::from_str(r#"{"method":"mining.notify","params":[]}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Notification);
    }

    #[test]
    fn classify_response() {
        let msg: Message =
            serde_json::from_str(r#"{"id":4,"result":true,"error":null}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert_eq!(msg.id(), Some(4));
    }

    #[test]
    fn unclassifiable_input_fails() {
        assert!(serde_json::from_str::<Message>("[1,2,3]").is_err());
        assert!(serde_json::from_str::<Message>(r#""hello""#).is_err());
        assert!(serde_json::from_str::<Message>(r#"{"params":[]}"#).is_err());
    }

    #[test]
    fn authorize_response_wire_format() {
        let ok = authorize_response(1, true, None);
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"id":1,"result":true,"error":null}"#
        );

        let err = authorize_response(7, false, Some(StratumErr::new(ErrorCode::Unknown, None)));
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"id":7,"result":false,"error":[20,"Other/Unknown",null]}"#
        );
    }

    #[test]
    fn submit_response_error_codes() {
        let low = submit_response(
            3,
            false,
            Some(StratumErr::new(ErrorCode::LowDifficultyShare, None)),
        );
        assert_eq!(
            serde_json::to_string(&low).unwrap(),
            r#"{"id":3,"result":false,"error":[23,"Low difficulty share",null]}"#
        );

        let dup = submit_response(
            9,
            false,
            Some(StratumErr::new(ErrorCode::DuplicateShare, None)),
        );
        assert!(serde_json::to_string(&dup)
            .unwrap()
            .contains(r#"[22,"Duplicate share",null]"#));
    }

    #[test]
    fn stratum_err_roundtrip() {
        let err = StratumErr::new(ErrorCode::StaleJob, Some(json!("job8")));
        let encoded = serde_json::to_string(&err).unwrap();
        assert_eq!(encoded, r#"[21,"Job not found","job8"]"#);
        let decoded: StratumErr = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, err);

        // The data slot may be omitted entirely.
        let short: StratumErr = serde_json::from_str(r#"[20,"Other/Unknown"]"#).unwrap();
        assert_eq!(short.data, None);
    }

    #[test]
    fn subscribe_response_shape() {
        let msg = subscribe_response(2, "mna1b2c3d4", "a1b2c3d4", 4);
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            encoded["result"],
            json!([["mining.notify", "mna1b2c3d4"], "a1b2c3d4", 4])
        );
        assert_eq!(encoded["error"], Value::Null);
    }

    #[test]
    fn notification_carries_null_id() {
        let diff = BigRational::from_integer(64.into());
        let msg = set_difficulty(&diff);
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains(r#""id":null"#));
        assert!(encoded.contains(r#""params":[64.0]"#));
    }

    #[test]
    fn work_notification_roundtrip() {
        let msg = work_notification(
            "job1", "aa".repeat(32).as_str(), "cc", "dd", "06000000", "be2d011b", "f4631e5b",
            true,
        );
        let Message::Request { params, .. } = &msg else {
            panic!("expected request");
        };
        let parsed = parse_work_notification(params).unwrap();
        assert_eq!(parsed.job_id, "job1");
        assert_eq!(parsed.nbits, "be2d011b");
        assert_eq!(parsed.ntime, "f4631e5b");
        assert!(parsed.clean_job);
    }

    #[test]
    fn parse_authorize_params() {
        assert_eq!(
            parse_authorize(&json!(["addr.worker", "x"])).unwrap(),
            "addr.worker"
        );
        assert!(parse_authorize(&json!([])).is_err());
        assert!(parse_authorize(&json!("addr.worker")).is_err());
    }

    #[test]
    fn parse_subscribe_params() {
        assert_eq!(
            parse_subscribe(&json!(["cgminer"])).unwrap(),
            (Some("cgminer".to_string()), None)
        );
        assert_eq!(
            parse_subscribe(&json!(["cgminer", "nid7"])).unwrap(),
            (Some("cgminer".to_string()), Some("nid7".to_string()))
        );
        assert_eq!(parse_subscribe(&json!([])).unwrap(), (None, None));
        assert!(parse_subscribe(&json!([7])).is_err());
    }

    #[test]
    fn parse_submit_passthrough() {
        let params = json!(["w", "job1", "00000001", "f4631e5b", "deadbeef"]);
        let parsed = parse_submit(&params, Miner::Cpu).unwrap();
        assert_eq!(parsed.ntime, "f4631e5b");
        assert_eq!(parsed.nonce, "deadbeef");
    }

    #[test]
    fn parse_submit_normalizes_big_endian_hardware() {
        let params = json!(["w", "job1", "0102030405060708a1b2c3d4", "5b1e63f4", "efbeadde"]);
        let parsed = parse_submit(&params, Miner::AntminerDR3).unwrap();
        assert_eq!(parsed.ntime, "f4631e5b");
        assert_eq!(parsed.nonce, "deadbeef");
        // The combined extranonce2 is never byte-swapped.
        assert_eq!(parsed.extra_nonce2, "0102030405060708a1b2c3d4");
    }

    #[test]
    fn parse_submit_rejects_short_params() {
        let params = json!(["w", "job1", "00000001"]);
        assert!(parse_submit(&params, Miner::Cpu).is_err());
    }
}
