//! Remote catalog access.
//!
//! - `client`: HTTP implementation of [`CatalogSource`]
//! - `payload`: typed listing/detail payloads and their fallback rules
//! - `source`: the trait the synchronizer depends on

mod client;
pub mod payload;
mod source;

pub use client::RemoteCatalogClient;
pub use payload::{
    AttachmentPayload, AuthorPayload, ModelDetail, ModelSummary, ModelsEnvelope, TagPayload,
};
pub use source::CatalogSource;
