//! Domain enums shared by handlers, work items and playbooks.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Issue severity, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            "INFO" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Closed set of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ops,
    Security,
    Api,
    Seo,
    Accessibility,
    Performance,
    Ux,
    Data,
    Payments,
    Auth,
    Cost,
    Learning,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ops => "ops",
            Category::Security => "security",
            Category::Api => "api",
            Category::Seo => "seo",
            Category::Accessibility => "accessibility",
            Category::Performance => "performance",
            Category::Ux => "ux",
            Category::Data => "data",
            Category::Payments => "payments",
            Category::Auth => "auth",
            Category::Cost => "cost",
            Category::Learning => "learning",
            Category::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ops" => Ok(Category::Ops),
            "security" => Ok(Category::Security),
            "api" => Ok(Category::Api),
            "seo" => Ok(Category::Seo),
            "accessibility" => Ok(Category::Accessibility),
            "performance" => Ok(Category::Performance),
            "ux" => Ok(Category::Ux),
            "data" => Ok(Category::Data),
            "payments" => Ok(Category::Payments),
            "auth" => Ok(Category::Auth),
            "cost" => Ok(Category::Cost),
            "learning" => Ok(Category::Learning),
            "other" => Ok(Category::Other),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}
