//! Gateway HTTP surface and its client.
//!
//! [`server`] exposes any [`LlmGateway`](roundtable_application::LlmGateway)
//! over HTTP; [`HttpGatewayClient`] is the matching `LlmGateway` for
//! processes that talk to a remote gateway instead of the vendors.

pub mod catalog;
pub mod client;
pub mod server;
pub mod wire;

pub use catalog::{
    CatalogSource, DEFAULT_CATALOG_TTL, ModelCatalog, ModelInfo, OpenRouterCatalog, SearchPage,
    SearchQuery, search_models,
};
pub use client::HttpGatewayClient;
pub use server::{GatewayState, ServerError, router, serve};
pub use wire::{ChatBody, CompletionBody, ErrorBody, WireEvent};
