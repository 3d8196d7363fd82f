/*!
Convert structured values into GELF messages.

A [`Message`] carries the well-known GELF metadata fields alongside an
arbitrary structured payload. Encoding a message flattens the payload into
underscore-joined custom fields, merges them with the metadata and any
explicitly added fields, and serializes the result as a single flat JSON
object. An [`Encoder`] frames a sequence of encoded messages onto a byte
sink, separating consecutive messages with a single NUL byte.

The crate is split into a few main components, in order of where they
appear in the production of a log event:

- **Flatten**: Decomposes a nested structured value into a flat list of
key/value pairs, escaping subtrees beyond a recursion limit to their JSON
text.
- **Message**: Holds metadata, payload, and explicit field overrides, and
assembles them into GELF-encoded bytes.
- **Encode**: Writes framed messages to any `std::io::Write` sink,
retrying partial writes.

# Example

```
use gelfenc::{Encoder, Message};
use serde_json::json;

let mut msg = Message::new("request handled");
msg.set_data(json!({
    "k1": "v1",
    "k2": { "k3": "v3" },
    "k4": [1, 2, 3],
}));

let mut out = Vec::new();
let mut encoder = Encoder::new(&mut out);
encoder.write(&msg).expect("failed to encode GELF");

println!("{}", String::from_utf8_lossy(&out));
```
*/

#![deny(unsafe_code)]

#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod encode;
pub mod error;
pub mod flatten;
pub mod message;

pub use self::{
    config::Config,
    encode::Encoder,
    error::Error,
    message::{build, Message, Messages},
};
