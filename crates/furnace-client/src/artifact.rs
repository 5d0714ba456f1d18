use reqwest::Url;

use crate::backend::{chart_query, proxy_url};
use crate::error::Result;
use crate::registry::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub target: Target,
    pub epoch: i64,
}

impl ArtifactRef {
    pub fn new(target: Target, epoch: i64) -> Self {
        Self { target, epoch }
    }

    pub fn view_url(&self, base_url: &str) -> Result<Url> {
        proxy_url(base_url, "chart", &chart_query(&self.target, self.epoch, false))
    }

    pub fn download_url(&self, base_url: &str) -> Result<Url> {
        proxy_url(base_url, "chart", &chart_query(&self.target, self.epoch, true))
    }

    pub fn suggested_file_name(&self) -> String {
        format!("{}_{}.svg", self.target.namespace, self.target.name)
    }
}

#[derive(Debug, Default)]
pub struct ArtifactPresenter {
    current: Option<ArtifactRef>,
}

impl ArtifactPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ArtifactRef> {
        self.current.as_ref()
    }

    pub fn sync(&mut self, latest: Option<ArtifactRef>) -> bool {
        if self.current == latest {
            return false;
        }
        self.current = latest;
        true
    }
}
