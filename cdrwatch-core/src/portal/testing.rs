//! Scripted transport for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use super::transport::{PortalResponse, PortalTransport};
use crate::error::{Error, Result};

pub(crate) const BASE: &str = "https://portal.example.com";

pub(crate) fn url(path: &str) -> Url {
    Url::parse(BASE).unwrap().join(path).unwrap()
}

pub(crate) fn html(path: &str, body: &str) -> PortalResponse {
    PortalResponse {
        status: 200,
        url: url(path),
        location: None,
        body: body.to_string(),
    }
}

pub(crate) fn redirect(path: &str, location: &str) -> PortalResponse {
    PortalResponse {
        status: 302,
        url: url(path),
        location: Some(location.to_string()),
        body: String::new(),
    }
}

/// Replies from per-route queues; the last queued reply repeats.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<Result<PortalResponse>>>>,
    requests: Mutex<Vec<(&'static str, String)>>,
    posted: Mutex<Vec<Vec<(String, String)>>>,
    resets: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn on_get(&self, path: &str, response: PortalResponse) -> &Self {
        self.push("GET", path, Ok(response))
    }

    pub(crate) fn on_post(&self, path: &str, response: PortalResponse) -> &Self {
        self.push("POST", path, Ok(response))
    }

    pub(crate) fn fail_get(&self, path: &str, message: &str) -> &Self {
        self.push("GET", path, Err(Error::Transport(message.to_string())))
    }

    /// Replace every queued reply for a route
    pub(crate) fn replace_post(&self, path: &str, response: PortalResponse) {
        let key = ("POST", url(path).to_string());
        self.routes
            .lock()
            .unwrap()
            .insert(key, VecDeque::from([Ok(response)]));
    }

    fn push(&self, method: &'static str, path: &str, reply: Result<PortalResponse>) -> &Self {
        let key = (method, url(path).to_string());
        self.routes
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(reply);
        self
    }

    fn reply(&self, method: &'static str, url: &Url) -> Result<PortalResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((method, url.to_string()));

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&(method, url.to_string()))
            .ok_or_else(|| Error::Transport(format!("no route for {} {}", method, url)))?;

        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(clone_reply)
        };
        reply.unwrap_or_else(|| Err(Error::Transport("empty route".to_string())))
    }

    pub(crate) fn count(&self, method: &str, path: &str) -> usize {
        let target = url(path).to_string();
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, u)| *m == method && *u == target)
            .count()
    }

    pub(crate) fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn last_form(&self) -> Option<Vec<(String, String)>> {
        self.posted.lock().unwrap().last().cloned()
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

fn clone_reply(reply: &Result<PortalResponse>) -> Result<PortalResponse> {
    match reply {
        Ok(response) => Ok(response.clone()),
        Err(e) => Err(Error::Transport(e.to_string())),
    }
}

#[async_trait]
impl PortalTransport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<PortalResponse> {
        self.reply("GET", url)
    }

    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<PortalResponse> {
        self.posted.lock().unwrap().push(form.to_vec());
        self.reply("POST", url)
    }

    fn reset_cookies(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
