use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, Response};

use crate::error::{Error, Result};
use crate::registry::{Target, parse_registrations};
use crate::selection::RecordingOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopParams {
    pub width: u32,
    pub options: RecordingOptions,
}

impl StopParams {
    pub fn new(viewport_width: u32, margin: u32, options: RecordingOptions) -> Self {
        Self {
            width: viewport_width.saturating_sub(margin).max(1),
            options,
        }
    }
}

pub trait ProfilingBackend: Send + Sync {
    fn list_targets(&self) -> Result<Vec<Target>>;
    fn start(&self, target: &Target) -> Result<()>;
    fn stop(&self, target: &Target, params: &StopParams) -> Result<()>;
    fn status(&self, target: &Target) -> Result<String>;
    fn chart(&self, target: &Target, epoch: i64, download: bool) -> Result<Vec<u8>>;
}

pub fn proxy_url(base_url: &str, op: &str, params: &[(&str, String)]) -> Result<Url> {
    let raw = format!("{}/proxy/{}", base_url.trim().trim_end_matches('/'), op);
    let mut url =
        Url::parse(&raw).map_err(|e| Error::msg(format!("invalid proxy URL '{raw}': {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}

pub(crate) fn target_params(target: &Target) -> Vec<(&'static str, String)> {
    vec![
        ("namespace", target.namespace.clone()),
        ("pod", target.name.clone()),
    ]
}

pub(crate) fn stop_query(target: &Target, params: &StopParams) -> Vec<(&'static str, String)> {
    let mut q = target_params(target);
    q.push(("width", params.width.to_string()));
    q.push(("colors", params.options.colors.as_str().to_string()));
    q.push(("inverted", params.options.inverted.to_string()));
    q.push(("symfs", params.options.use_symfs.to_string()));
    q
}

pub(crate) fn chart_query(target: &Target, epoch: i64, download: bool) -> Vec<(&'static str, String)> {
    let mut q = target_params(target);
    q.push(("time", epoch.to_string()));
    if download {
        q.push(("download", "true".to_string()));
    }
    q
}

pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        // Validate early so a typo fails at startup rather than on every poll.
        proxy_url(base_url, "registered", &[])?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, op: &str, params: &[(&str, String)]) -> Result<Url> {
        proxy_url(&self.base_url, op, params)
    }
}

fn check(op: &str, res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().unwrap_or_default();
    let body = crate::log_sanitize::sanitize_with_limit(&body, 200);
    if body.is_empty() {
        Err(Error::msg(format!("{op} failed with status {status}")))
    } else {
        Err(Error::msg(format!("{op} failed with status {status}: {body}")))
    }
}

impl ProfilingBackend for HttpBackend {
    fn list_targets(&self) -> Result<Vec<Target>> {
        let res = self.client.get(self.url("registered", &[])?).send()?;
        let body = check("list targets", res)?.text()?;
        parse_registrations(&body)
    }

    fn start(&self, target: &Target) -> Result<()> {
        let url = self.url("start", &target_params(target))?;
        tracing::info!(pod = %target, "requesting start");
        check("start", self.client.post(url).send()?)?;
        Ok(())
    }

    fn stop(&self, target: &Target, params: &StopParams) -> Result<()> {
        let url = self.url("stop", &stop_query(target, params))?;
        tracing::info!(pod = %target, width = params.width, colors = %params.options.colors, "requesting stop");
        check("stop", self.client.post(url).send()?)?;
        Ok(())
    }

    fn status(&self, target: &Target) -> Result<String> {
        let url = self.url("status", &target_params(target))?;
        let body = check("status", self.client.get(url).send()?)?.text()?;
        Ok(body.trim().to_string())
    }

    fn chart(&self, target: &Target, epoch: i64, download: bool) -> Result<Vec<u8>> {
        let url = self.url("chart", &chart_query(target, epoch, download))?;
        let res = check("chart", self.client.get(url).send()?)?;
        Ok(res.bytes()?.to_vec())
    }
}
