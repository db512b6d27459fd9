use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{
    KNOWN_METHODS, METHOD_ANSWER, METHOD_JOIN, METHOD_OFFER, METHOD_TRICKLE, ResponseOutcome,
    RpcError, SignalingMessage,
};
use crate::error::SignalingError;

const JSONRPC_VERSION: &str = "2.0";

#[derive(Serialize)]
struct RequestEnvelope<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    params: &'a P,
}

#[derive(Serialize)]
struct ResponseEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

pub fn encode(message: &SignalingMessage) -> Result<Bytes, SignalingError> {
    let encoded = match message {
        SignalingMessage::Join { id, params } => request(METHOD_JOIN, Some(*id), params),
        SignalingMessage::Answer { id, params } => request(METHOD_ANSWER, Some(*id), params),
        SignalingMessage::Offer { id, offer } => request(METHOD_OFFER, Some(*id), offer),
        SignalingMessage::Trickle(record) => request(METHOD_TRICKLE, None, record),
        SignalingMessage::Response { id, outcome } => {
            let (result, error) = match outcome {
                ResponseOutcome::Result(value) => (Some(value), None),
                ResponseOutcome::Error(err) => (None, Some(err)),
            };
            serde_json::to_vec(&ResponseEnvelope {
                jsonrpc: JSONRPC_VERSION,
                id: *id,
                result,
                error,
            })
        }
    };
    encoded.map(Bytes::from).map_err(SignalingError::malformed)
}

fn request<P: Serialize>(
    method: &'static str,
    id: Option<u64>,
    params: &P,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&RequestEnvelope {
        jsonrpc: JSONRPC_VERSION,
        method,
        id,
        params,
    })
}

/// Decodes one inbound frame.
///
/// Responses and peer-initiated calls share the stream, so a frame carrying an
/// id plus `result`/`error` and no recognised method is resolved as a
/// response first; only then is the method consulted.
pub fn decode(frame: &[u8]) -> Result<SignalingMessage, SignalingError> {
    let value: Value = serde_json::from_slice(frame).map_err(SignalingError::malformed)?;
    let Value::Object(mut object) = value else {
        return Err(SignalingError::MalformedMessage(
            "expected a JSON object".into(),
        ));
    };

    let id = parse_id(object.get("id"))?;
    let method = match object.get("method") {
        None | Some(Value::Null) => None,
        Some(Value::String(method)) => Some(method.clone()),
        Some(other) => {
            return Err(SignalingError::MalformedMessage(format!(
                "method must be a string, got {other}"
            )));
        }
    };

    let known = method
        .as_deref()
        .is_some_and(|method| KNOWN_METHODS.contains(&method));
    if !known {
        if let Some(id) = id {
            if let Some(outcome) = take_outcome(&mut object)? {
                return Ok(SignalingMessage::Response { id, outcome });
            }
        }
        return Err(match method {
            Some(method) => SignalingError::UnknownMethod(method),
            None => SignalingError::MalformedMessage(
                "frame is neither a known call nor a response".into(),
            ),
        });
    }

    let params = object.remove("params").unwrap_or(Value::Null);
    match method.as_deref() {
        Some(METHOD_JOIN) => Ok(SignalingMessage::Join {
            id: require_id(id, METHOD_JOIN)?,
            params: parse_params(params, METHOD_JOIN)?,
        }),
        Some(METHOD_ANSWER) => Ok(SignalingMessage::Answer {
            id: require_id(id, METHOD_ANSWER)?,
            params: parse_params(params, METHOD_ANSWER)?,
        }),
        Some(METHOD_OFFER) => Ok(SignalingMessage::Offer {
            id: require_id(id, METHOD_OFFER)?,
            offer: parse_params(params, METHOD_OFFER)?,
        }),
        Some(METHOD_TRICKLE) => Ok(SignalingMessage::Trickle(parse_params(
            params,
            METHOD_TRICKLE,
        )?)),
        _ => Err(SignalingError::MalformedMessage(
            "unroutable method".into(),
        )),
    }
}

// Ids of 0 or null count as absent.
fn parse_id(value: Option<&Value>) -> Result<Option<u64>, SignalingError> {
    let id = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_u64().ok_or_else(|| {
            SignalingError::MalformedMessage(format!("id {number} is not an unsigned integer"))
        })?,
        Some(Value::String(text)) => text.parse::<u64>().map_err(|_| {
            SignalingError::MalformedMessage(format!("id {text:?} is not numeric"))
        })?,
        Some(other) => {
            return Err(SignalingError::MalformedMessage(format!(
                "unsupported id {other}"
            )));
        }
    };
    Ok((id != 0).then_some(id))
}

fn require_id(id: Option<u64>, method: &str) -> Result<u64, SignalingError> {
    id.ok_or_else(|| SignalingError::MalformedMessage(format!("{method} request without an id")))
}

fn take_outcome(
    object: &mut Map<String, Value>,
) -> Result<Option<ResponseOutcome>, SignalingError> {
    match object.remove("error") {
        None | Some(Value::Null) => {}
        Some(error) => {
            let error: RpcError =
                serde_json::from_value(error).map_err(SignalingError::malformed)?;
            return Ok(Some(ResponseOutcome::Error(error)));
        }
    }
    Ok(object.remove("result").map(ResponseOutcome::Result))
}

fn parse_params<T: DeserializeOwned>(params: Value, method: &str) -> Result<T, SignalingError> {
    serde_json::from_value(params)
        .map_err(|err| SignalingError::MalformedMessage(format!("{method} params: {err}")))
}
