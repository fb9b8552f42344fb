//! Plain-text documents returned to test harnesses.
//!
//! Success is `OK` followed by one block per attribute (name line, then a
//! tab-indented line per value). Failure is `ERROR` followed by the message.

use std::fmt::Write as _;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common_auth::Attributes;

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Outcome of a check that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Ok(Attributes),
    /// The source took over the request cycle; the client is sent on.
    Redirect { location: String },
}

impl Report {
    pub fn ok() -> Self {
        Report::Ok(Attributes::new())
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Report::Ok(_) => "ok",
            Report::Redirect { .. } => "redirect",
        }
    }
}

impl IntoResponse for Report {
    fn into_response(self) -> Response {
        match self {
            Report::Ok(attributes) => plain_text(StatusCode::OK, success_body(&attributes)),
            Report::Redirect { location } => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
        }
    }
}

pub fn failure(message: &str) -> Response {
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, failure_body(message))
}

pub fn success_body(attributes: &Attributes) -> String {
    let mut body = String::from("OK\n");
    for (name, values) in attributes {
        let _ = writeln!(body, "{name}");
        for value in values {
            let _ = writeln!(body, "\t{value}");
        }
    }
    body
}

pub fn failure_body(message: &str) -> String {
    format!("ERROR\n{message}\n")
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        body,
    )
        .into_response()
}
