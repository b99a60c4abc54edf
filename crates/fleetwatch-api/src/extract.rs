//! Body and query extractors whose rejections render as [`ApiError`].

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ApiError;

/// [`axum::Json`] with a `400 {"error": …}` rejection.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// [`axum::extract::Query`] with a `400 {"error": …}` rejection.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
