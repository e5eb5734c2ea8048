//! Built-in payload and extension types, registered by default in the
//! process-wide [`TypeRegistry`](crate::registry::TypeRegistry).

pub mod bind;
pub mod chat_states;
pub mod commands;
pub mod data_form;
pub mod delay;
pub mod disco;
pub mod forward;
pub mod hints;
pub mod httpauth;
pub mod iot;
pub mod mam;
pub mod markers;
pub mod muc;
pub mod oob;
pub mod ping;
pub mod pubsub;
pub mod receipts;
pub mod roster;
pub mod rsm;
pub mod stanza_id;
pub mod version;
pub mod xhtml;
