//! Structured values and the codecs that move them through a payload buffer.
//!
//! A call is a [`Request`] (a `kind` tag plus ordered [`Value`] arguments);
//! its answer is a [`Response`] envelope. Both are encoded with a [`Codec`]
//! selected by [`Encoding`]. Every encoding is self-describing: decoding needs
//! no out-of-band type information.

mod codec;
mod message;
mod value;

pub use codec::{Codec, CodecError, Encoding, JsonCodec, PostcardCodec, UnknownEncoding};
pub use message::{RESERVED_KIND_PREFIX, Request, Response, SHUTDOWN_KIND};
pub use value::Value;
