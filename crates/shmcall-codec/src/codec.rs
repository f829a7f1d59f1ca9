use serde::{Serialize, de::DeserializeOwned, de::IgnoredAny};
use std::fmt;
use std::str::FromStr;

/// Encoding format identifier for payload serialization.
///
/// Both ends of a channel must be configured with the same encoding; nothing
/// on the wire announces it.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Postcard: compact binary format (default).
    #[default]
    Postcard = 1,
    /// JSON: human-readable format (for debugging/tooling).
    Json = 2,
}

impl Encoding {
    /// Encode a value with this encoding's codec.
    pub fn encode<T: Serialize>(self, val: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Encoding::Postcard => PostcardCodec::encode(val),
            Encoding::Json => JsonCodec::encode(val),
        }
    }

    /// Decode a value with this encoding's codec.
    pub fn decode<T: DeserializeOwned>(self, buf: &[u8]) -> Result<T, CodecError> {
        match self {
            Encoding::Postcard => PostcardCodec::decode(buf),
            Encoding::Json => JsonCodec::decode(buf),
        }
    }
}

impl TryFrom<u16> for Encoding {
    type Error = UnknownEncoding;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Encoding::Postcard),
            2 => Ok(Encoding::Json),
            _ => Err(UnknownEncoding(v.to_string())),
        }
    }
}

impl From<Encoding> for u16 {
    fn from(encoding: Encoding) -> u16 {
        encoding as u16
    }
}

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postcard" => Ok(Encoding::Postcard),
            "json" => Ok(Encoding::Json),
            _ => Err(UnknownEncoding(s.to_owned())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

/// Error when converting from an unknown encoding id or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEncoding(pub String);

impl fmt::Display for UnknownEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown encoding: {}", self.0)
    }
}

impl std::error::Error for UnknownEncoding {}

/// Encoding or decoding failed.
///
/// `Decode` means the bytes were malformed or truncated; it is never used for
/// a well-formed value the receiver did not expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Encode(String),
    Decode(String),
}

impl CodecError {
    pub fn is_decode(&self) -> bool {
        matches!(self, CodecError::Decode(_))
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(msg) => write!(f, "encode failed: {msg}"),
            CodecError::Decode(msg) => write!(f, "decode failed: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Codec trait for payload serialization.
///
/// Decoders receive the whole payload region, so they must tolerate trailing
/// zero padding after the encoded message.
pub trait Codec {
    /// The encoding type this codec implements.
    const ENCODING: Encoding;

    /// Encode a value into bytes.
    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError>;
}

/// Postcard codec: compact binary format using postcard serialization.
///
/// Enum variants are written as tags and sequences as length prefixes, so a
/// message delimits itself and padding after it is never read.
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    const ENCODING: Encoding = Encoding::Postcard;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(val).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError> {
        postcard::from_bytes(buf).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// JSON codec: human-readable format using serde_json.
///
/// Useful when inspecting a channel's bytes by hand. Larger than postcard.
///
/// serde_json refuses to parse nesting deeper than its recursion limit, so
/// `encode` parses its own output once and rejects anything the receiving
/// side could not read. Non-finite floats in a [`Value`](crate::Value) are
/// rejected while serializing.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const ENCODING: Encoding = Encoding::Json;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, CodecError> {
        let bytes = serde_json::to_vec(val).map_err(|e| CodecError::Encode(e.to_string()))?;
        serde_json::from_slice::<IgnoredAny>(&bytes)
            .map_err(|e| CodecError::Encode(format!("receiver cannot parse output: {e}")))?;
        Ok(bytes)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError> {
        // JSON text never contains a raw NUL, so zero padding is unambiguous.
        let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        serde_json::from_slice(&buf[..end]).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response, Value};
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const CAPACITY: usize = 2044;

    fn arb_value() -> impl Strategy<Value = Value> {
        use proptest::num::f64;
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (f64::NORMAL | f64::SUBNORMAL | f64::ZERO | f64::INFINITE).prop_map(Value::Float),
            ".{0,12}".prop_map(Value::String),
            vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                vec(inner.clone(), 0..6).prop_map(Value::List),
                btree_map(".{0,8}", inner, 0..6).prop_map(Value::Map),
            ]
        })
    }

    fn has_non_finite(value: &Value) -> bool {
        match value {
            Value::Float(x) => !x.is_finite(),
            Value::List(items) => items.iter().any(has_non_finite),
            Value::Map(map) => map.values().any(has_non_finite),
            _ => false,
        }
    }

    fn nest(depth: usize) -> Value {
        (0..depth).fold(Value::Null, |inner, _| Value::List(vec![inner]))
    }

    proptest! {
        #[test]
        fn values_round_trip_through_padded_payload(value in arb_value()) {
            for encoding in [Encoding::Postcard, Encoding::Json] {
                let req = Request::new("resolve", vec![value.clone()]);
                match encoding.encode(&req) {
                    Ok(mut bytes) => {
                        prop_assert!(encoding == Encoding::Postcard || !has_non_finite(&value));
                        if bytes.len() <= CAPACITY {
                            bytes.resize(CAPACITY, 0);
                            let decoded: Request = encoding.decode(&bytes).unwrap();
                            prop_assert_eq!(decoded, req);
                        }
                    }
                    Err(err) => {
                        prop_assert!(!err.is_decode());
                        prop_assert_eq!(encoding, Encoding::Json);
                        prop_assert!(has_non_finite(&value));
                    }
                }
            }
        }
    }

    #[test]
    fn json_rejects_non_finite_floats_when_encoding() {
        for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let req = Request::new("echo", vec![Value::Float(x)]);
            let err = JsonCodec::encode(&req).unwrap_err();
            assert!(matches!(err, CodecError::Encode(_)), "{x}: {err}");

            let bytes = PostcardCodec::encode(&req).unwrap();
            let decoded: Request = PostcardCodec::decode(&bytes).unwrap();
            assert_eq!(decoded.args[0].as_f64().map(f64::to_bits), Some(x.to_bits()));
        }
    }

    #[test]
    fn json_rejects_nesting_the_receiver_cannot_parse() {
        let req = Request::new("identity", vec![nest(130)]);
        let err = JsonCodec::encode(&req).unwrap_err();
        assert!(matches!(err, CodecError::Encode(_)), "{err}");

        let shallow = Request::new("identity", vec![nest(40)]);
        let bytes = JsonCodec::encode(&shallow).unwrap();
        assert_eq!(JsonCodec::decode::<Request>(&bytes).unwrap(), shallow);

        let deep = Request::new("identity", vec![nest(1000)]);
        let bytes = PostcardCodec::encode(&deep).unwrap();
        assert_eq!(PostcardCodec::decode::<Request>(&bytes).unwrap(), deep);
    }

    fn nested_value() -> Value {
        let mut context = BTreeMap::new();
        context.insert("conditions".to_owned(), Value::List(vec!["node".into(), "import".into()]));
        context.insert("parentURL".to_owned(), Value::Null);
        let depth = Value::List(vec![Value::List(vec![Value::Map(BTreeMap::new())])]);
        context.insert("depth".to_owned(), depth);
        Value::List(vec![
            Value::Int(-7),
            Value::Float(1.5),
            Value::Bool(false),
            Value::Bytes(vec![0, 255, 0]),
            Value::String("./dep.mjs".into()),
            Value::Map(context),
        ])
    }

    #[test]
    fn encoding_try_from_u16() {
        assert_eq!(Encoding::try_from(1).unwrap(), Encoding::Postcard);
        assert_eq!(Encoding::try_from(2).unwrap(), Encoding::Json);
        assert_eq!(Encoding::try_from(99), Err(UnknownEncoding("99".into())));
        assert_eq!(u16::from(Encoding::Json), 2);
    }

    #[test]
    fn encoding_from_str() {
        assert_eq!("postcard".parse::<Encoding>().unwrap(), Encoding::Postcard);
        assert_eq!(" JSON ".parse::<Encoding>().unwrap(), Encoding::Json);
        assert!("cbor".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Postcard.to_string(), "postcard");
    }

    #[test]
    fn postcard_round_trips_nested_request() {
        let req = Request::new("resolve", vec![nested_value()]);
        let bytes = PostcardCodec::encode(&req).unwrap();
        let decoded: Request = PostcardCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn json_round_trips_nested_response() {
        let resp = Response::Return(nested_value());
        let bytes = JsonCodec::encode(&resp).unwrap();
        let decoded: Response = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn decoders_ignore_zero_padding() {
        let resp = Response::Return(Value::from("ping"));
        for encoding in [Encoding::Postcard, Encoding::Json] {
            let mut bytes = encoding.encode(&resp).unwrap();
            bytes.resize(2044, 0);
            let decoded: Response = encoding.decode(&bytes).unwrap();
            assert_eq!(decoded, resp, "{encoding}");
        }
    }

    #[test]
    fn truncated_postcard_is_a_decode_error() {
        let req = Request::new("load", vec!["file:///x.mjs".into()]);
        let bytes = PostcardCodec::encode(&req).unwrap();
        let err = PostcardCodec::decode::<Request>(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = JsonCodec::decode::<Request>(b"{\"kind\": ").unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("decode failed"));
    }

    #[test]
    fn postcard_is_more_compact_than_json() {
        let req = Request::new("resolve", vec![nested_value()]);
        let postcard = PostcardCodec::encode(&req).unwrap();
        let json = JsonCodec::encode(&req).unwrap();
        assert!(postcard.len() < json.len());
    }
}
