//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use trimtrace_core::prelude::*;
//! ```

// Core analysis types
pub use crate::error::{TrimtraceError, TrimtraceResult};
pub use crate::facts::{FactRecorder, Facts};
pub use crate::model::{MethodDef, Node, Program, TypeDef};

// Classification
pub use crate::classify::{Classifier, Reason, RuleClassifier, SetClassifier};

// Builder API
pub use crate::analysis::{AnalysisOptions, AnalysisReport, TrimAnalysis};

// Reporting
pub use crate::report::{print_json, print_plain, Grouping, ReportSummary};

// Configuration
pub use crate::config::{load_config, TrimtraceConfig};
