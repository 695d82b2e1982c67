use axum::{
    extract::{FromRequest, Query, Request},
    http::header,
    response::{IntoResponse, Response},
    Form,
};
use serde::de::DeserializeOwned;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Request parameters read from a form body when one is sent, otherwise from the query string.
#[derive(Debug)]
pub struct Params<T>(pub T);

impl<T, S> FromRequest<S> for Params<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if has_form_body(&req) {
            let Form(params) = Form::<T>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(Self(params));
        }

        let Query(params) =
            Query::<T>::try_from_uri(req.uri()).map_err(IntoResponse::into_response)?;
        Ok(Self(params))
    }
}

fn has_form_body(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with(FORM_URLENCODED))
}
