//! Scripted collaborators for unit tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use serde_json::Value;

use crate::safety::ConfirmationOracle;
use crate::transport::{Error, Method, Request, Transport};

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Timeout,
    Status(u16),
}

/// Records every request and answers from a table keyed by method and
/// path (including the query string).
///
/// Unscripted GETs answer 404, unscripted POSTs succeed with an empty body.
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<HashMap<(Method, String), Reply>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self, method: Method, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert((method, path.to_string()), reply);
    }

    pub(crate) fn on_get(&self, path: &str, body: Value) {
        self.on_get_raw(path, &body.to_string());
    }

    pub(crate) fn on_get_raw(&self, path: &str, body: &str) {
        self.script(
            Method::Get,
            path,
            Reply::Body(Bytes::copy_from_slice(body.as_bytes())),
        );
    }

    pub(crate) fn time_out(&self, method: Method, path: &str) {
        self.script(method, path, Reply::Timeout);
    }

    pub(crate) fn reject(&self, method: Method, path: &str, status: u16) {
        self.script(method, path, Reply::Status(status));
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self, path: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == Method::Post && request.path() == path)
            .collect()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path() == path)
            .count()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Bytes, Error> {
        let key = (request.method, request.path().to_string());
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let reply = self.replies.lock().unwrap().get(&key).cloned();
        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Timeout) => Err(Error::Timeout { url }),
            Some(Reply::Status(status)) => Err(Error::Status { url, status }),
            None if key.0 == Method::Post => Ok(Bytes::new()),
            None => Err(Error::Status { url, status: 404 }),
        }
    }
}

impl Request {
    /// The body parsed as JSON, `Null` when empty.
    pub(crate) fn json(&self) -> Value {
        match self.body.as_deref() {
            None | Some("") => Value::Null,
            Some(body) => serde_json::from_str(body).unwrap(),
        }
    }
}

/// Answers every prompt with a fixed value and counts the prompts.
pub(crate) struct MockOracle {
    answer: bool,
    asked: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockOracle {
    pub(crate) fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ConfirmationOracle for MockOracle {
    fn ask(&self, _title: &str, primary: &str, secondary: Option<&str>, _yes_no: bool) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let prompt = match secondary {
            Some(secondary) => format!("{primary} {secondary}"),
            None => primary.to_string(),
        };
        self.prompts.lock().unwrap().push(prompt);
        self.answer
    }
}
