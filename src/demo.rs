//! A minimal built-in gateway application, used only as the `zibai:hello`
//! identifier the binary's resolver recognizes out of the box (spec §1:
//! the application itself is an external collaborator — real deployments
//! resolve their own `module:attr` and never touch this module). Kept here,
//! rather than in the binary, because building a `HeaderMap` needs nothing
//! beyond this crate's public API and a one-file demo is easier to audit
//! than a resolver stub with no working target.

use crate::gateway::{Body, Environment, StartResponse};
use crate::http::types::{Header, HeaderMap, Status};
use bytes::Bytes;

/// Echoes the request method and path back as a plain-text body.
pub fn hello_app(env: Environment, start_response: StartResponse<'_>) -> Body {
    let mut headers = HeaderMap::default();
    headers.push(Header::new("content-type", "text/plain; charset=utf-8"));

    let body = format!("{} {} -> zibai\n", env.request_method, env.path_info);
    let status = Status::new(200, "OK").expect("200 OK is always a valid status");

    match start_response.start(status, headers, false) {
        Ok(_writer) => Body::new(std::iter::once(Bytes::from(body))),
        Err(_) => Body::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ErrorsSink, InputStream};
    use std::cell::RefCell;

    #[test]
    fn hello_app_emits_ok_and_body() {
        let env = Environment {
            request_method: "GET".to_string(),
            script_name: String::new(),
            path_info: "/hi".to_string(),
            query_string: String::new(),
            server_protocol: "HTTP/1.1",
            server_name: "localhost".to_string(),
            server_port: 8000,
            remote_addr: "127.0.0.1".to_string(),
            remote_port: 0,
            headers: HeaderMap::default(),
            input: InputStream::new(Bytes::new()),
            url_scheme: "http".to_string(),
            errors: ErrorsSink::new("GET", b"/hi"),
            multithread: false,
            multiprocess: false,
            run_once: false,
        };
        let head_state = RefCell::new(crate::gateway::ResponseHead::default());
        let start_response = StartResponse::new(&head_state);
        let mut body: Vec<u8> = Vec::new();
        for chunk in hello_app(env, start_response) {
            body.extend_from_slice(&chunk);
        }
        assert!(String::from_utf8(body).unwrap().starts_with("GET /hi"));
    }
}
