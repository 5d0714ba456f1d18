use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;
use crate::registry::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Hot,
    Chain,
    Java,
    Js,
    Perl,
    Red,
    Green,
    Blue,
    Aqua,
    Yellow,
    Purple,
    Orange,
}

impl ColorScheme {
    pub const ALL: [ColorScheme; 12] = [
        ColorScheme::Hot,
        ColorScheme::Chain,
        ColorScheme::Java,
        ColorScheme::Js,
        ColorScheme::Perl,
        ColorScheme::Red,
        ColorScheme::Green,
        ColorScheme::Blue,
        ColorScheme::Aqua,
        ColorScheme::Yellow,
        ColorScheme::Purple,
        ColorScheme::Orange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColorScheme::Hot => "hot",
            ColorScheme::Chain => "chain",
            ColorScheme::Java => "java",
            ColorScheme::Js => "js",
            ColorScheme::Perl => "perl",
            ColorScheme::Red => "red",
            ColorScheme::Green => "green",
            ColorScheme::Blue => "blue",
            ColorScheme::Aqua => "aqua",
            ColorScheme::Yellow => "yellow",
            ColorScheme::Purple => "purple",
            ColorScheme::Orange => "orange",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::msg(format!("unknown color scheme '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingOptions {
    pub colors: ColorScheme,
    pub inverted: bool,
    pub use_symfs: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            colors: ColorScheme::Hot,
            inverted: true,
            use_symfs: false,
        }
    }
}

impl RecordingOptions {
    pub fn with_colors(self, colors: ColorScheme) -> Self {
        Self { colors, ..self }
    }

    pub fn with_inverted(self, inverted: bool) -> Self {
        Self { inverted, ..self }
    }

    pub fn with_symfs(self, use_symfs: bool) -> Self {
        Self { use_symfs, ..self }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    namespace: Option<String>,
    pod: Option<String>,
}

impl Selection {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn pod(&self) -> Option<&str> {
        self.pod.as_deref()
    }

    pub fn target(&self) -> Option<Target> {
        match (&self.namespace, &self.pod) {
            (Some(ns), Some(pod)) => Some(Target::new(ns.clone(), pod.clone())),
            _ => None,
        }
    }

    pub(crate) fn set_namespace(&mut self, namespace: String) {
        self.namespace = Some(namespace);
        self.pod = None;
    }

    pub(crate) fn set_pod(&mut self, pod: String) {
        self.pod = Some(pod);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_scheme_round_trips_through_str() {
        for c in ColorScheme::ALL {
            assert_eq!(c.as_str().parse::<ColorScheme>().unwrap(), c);
        }
        assert_eq!("JAVA".parse::<ColorScheme>().unwrap(), ColorScheme::Java);
        assert!("magenta".parse::<ColorScheme>().is_err());
    }

    #[test]
    fn color_cycle_wraps() {
        assert_eq!(ColorScheme::Hot.next(), ColorScheme::Chain);
        assert_eq!(ColorScheme::Orange.next(), ColorScheme::Hot);
    }

    #[test]
    fn defaults_match_operator_page() {
        let o = RecordingOptions::default();
        assert_eq!(o.colors, ColorScheme::Hot);
        assert!(o.inverted);
        assert!(!o.use_symfs);
    }

    #[test]
    fn namespace_change_drops_pod() {
        let mut s = Selection::default();
        s.set_namespace("default".into());
        s.set_pod("a".into());
        assert_eq!(s.target(), Some(Target::new("default", "a")));
        s.set_namespace("web".into());
        assert_eq!(s.namespace(), Some("web"));
        assert!(s.target().is_none());
    }
}
