//! Instruction prompts sent to the vision model.
//!
//! Callers can override the default via [`crate::config::ReportConfig::prompt`];
//! the constant here is used only when no override is provided.

/// Default instruction for analysing one radiograph.
///
/// Sent as the text part of the single user-role message, ahead of the image.
/// The target model accepts no system-role message, so the role framing lives
/// here too.
pub const DEFAULT_ANALYSIS_PROMPT: &str = "You are an expert radiologist. Analyze this knee X-ray. \
Provide: IMAGE QUALITY, ANATOMICAL STRUCTURES, FINDINGS, SEVERITY, and RECOMMENDATIONS. \
Use plain text only, no markdown or asterisks.";

/// Fixed disclaimer appended once to every report.
pub const REPORT_DISCLAIMER: &str = "This AI-generated analysis is for informational purposes only \
and should NOT replace professional medical diagnosis.";
