use std::fmt;

use crate::log_sanitize::sanitize_log_line;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    PerfRecord,
    PerfScript,
    StackCollapse,
    FlameGraph,
    Idle,
    Unknown,
}

pub const MAX_ORDINAL: i32 = 4;

impl StatusKind {
    pub const ALL: [StatusKind; 5] = [
        StatusKind::PerfRecord,
        StatusKind::PerfScript,
        StatusKind::StackCollapse,
        StatusKind::FlameGraph,
        StatusKind::Idle,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw {
            "perf record" => StatusKind::PerfRecord,
            "perf script" => StatusKind::PerfScript,
            "stackcollapse" => StatusKind::StackCollapse,
            "flamegraph" => StatusKind::FlameGraph,
            "idle" => StatusKind::Idle,
            _ => StatusKind::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusKind::PerfRecord => "perf record",
            StatusKind::PerfScript => "perf script",
            StatusKind::StackCollapse => "stackcollapse",
            StatusKind::FlameGraph => "flamegraph",
            StatusKind::Idle => "idle",
            StatusKind::Unknown => "unknown",
        }
    }

    pub fn ordinal(self) -> i32 {
        match self {
            StatusKind::PerfRecord => 0,
            StatusKind::PerfScript => 1,
            StatusKind::StackCollapse => 2,
            StatusKind::FlameGraph => 3,
            StatusKind::Idle => 4,
            StatusKind::Unknown => -1,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == StatusKind::Idle
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProjection {
    pub kind: StatusKind,
    pub ordinal: i32,
    pub label: String,
}

impl StatusProjection {
    /// Fraction of the pipeline completed, or `None` when the stage is unknown
    /// and no progress bar should be drawn.
    pub fn progress_ratio(&self) -> Option<f64> {
        if self.ordinal < 0 {
            return None;
        }
        Some(f64::from(self.ordinal) / f64::from(MAX_ORDINAL))
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == StatusKind::Unknown
    }
}

pub fn project(status: &str) -> StatusProjection {
    let kind = StatusKind::parse(status);
    let label = match kind {
        StatusKind::Unknown => sanitize_log_line(status),
        known => known.label().to_string(),
    };
    StatusProjection {
        kind,
        ordinal: kind.ordinal(),
        label,
    }
}

pub fn project_kind(kind: StatusKind) -> StatusProjection {
    StatusProjection {
        kind,
        ordinal: kind.ordinal(),
        label: kind.label().to_string(),
    }
}
