// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_core::{
    DecodeConfig, DecodeDiagnostics, ExecutionContext, ParameterSet, Report, RrdError,
};
use rrd_decoder::{FinalCountRefinement, Pipeline, ProbabilityEntry, decode_with};
use serde::{Deserialize, Serialize};

/// Errors surfaced by the `rrd` binary, each with a stable envelope code.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Decode(#[from] RrdError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    InvalidInput(String),
}

impl CliError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(err) => err.code(),
            Self::InvalidInput(_) => "invalid_input",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
        }
    }
}

/// One entry of a client submission.
#[derive(Clone, Debug, Deserialize)]
pub struct SubmissionValue {
    #[serde(default)]
    pub report_id: Option<String>,
    pub steps: u64,
    pub prr: String,
    #[serde(default)]
    pub irr: Option<String>,
}

/// A client submission envelope carrying one or more reports.
#[derive(Clone, Debug, Deserialize)]
pub struct SubmissionEnvelope {
    #[serde(default)]
    pub parameter_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub cohort_id: Option<String>,
    pub values: Vec<SubmissionValue>,
}

impl SubmissionEnvelope {
    fn into_reports(self) -> impl Iterator<Item = Report> {
        let Self {
            parameter_id,
            device_id,
            cohort_id,
            values,
        } = self;
        values.into_iter().map(move |value| Report {
            bits: strip_bit_prefix(&value.prr).to_string(),
            value: value.steps,
            irr: value.irr.as_deref().map(|irr| strip_bit_prefix(irr).to_string()),
            report_id: value.report_id,
            device_id: device_id.clone(),
            cohort_id: cohort_id.clone(),
            parameter_id: parameter_id.clone(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportBatch {
    Reports(Vec<Report>),
    Envelope(SubmissionEnvelope),
    Envelopes(Vec<SubmissionEnvelope>),
}

/// Drops an optional `0b` prefix from a client bit string.
pub fn strip_bit_prefix(raw: &str) -> &str {
    raw.strip_prefix("0b").unwrap_or(raw)
}

/// Accepts a JSON array of reports, one submission envelope, or an array of
/// envelopes.
pub fn parse_report_batch(raw: &str) -> Result<Vec<Report>, CliError> {
    let batch: ReportBatch = serde_json::from_str(raw).map_err(|source| {
        CliError::json(
            "reports must be an array of {bits, value} objects or submission envelopes",
            source,
        )
    })?;
    let reports = match batch {
        ReportBatch::Reports(reports) => reports
            .into_iter()
            .map(|mut report| {
                report.bits = strip_bit_prefix(&report.bits).to_string();
                report
            })
            .collect(),
        ReportBatch::Envelope(envelope) => envelope.into_reports().collect(),
        ReportBatch::Envelopes(envelopes) => envelopes
            .into_iter()
            .flat_map(SubmissionEnvelope::into_reports)
            .collect(),
    };
    Ok(reports)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Append the ridge refinement stage.
    pub refine: bool,
    pub include_diagnostics: bool,
}

/// JSON document written by `rrd decode`.
#[derive(Clone, Debug, Serialize)]
pub struct DecodeOutput {
    pub table: Vec<ProbabilityEntry>,
    pub selected_lambda: Option<f64>,
    pub selection_mse: Option<f64>,
    pub coefficients: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_class_counts: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DecodeDiagnostics>,
}

pub fn run_decode(
    reports: &[Report],
    params: ParameterSet,
    config: &DecodeConfig,
    options: DecodeOptions,
    exec: &ExecutionContext<'_>,
) -> Result<DecodeOutput, RrdError> {
    let mut pipeline = Pipeline::standard();
    if options.refine {
        pipeline = pipeline.with_stage(FinalCountRefinement::default());
    }
    let outcome = decode_with(&pipeline, reports, params, config, exec)?;
    let ctx = outcome.context;
    Ok(DecodeOutput {
        table: outcome.table.entries,
        selected_lambda: ctx.selected_lambda,
        selection_mse: ctx.selection_mse,
        coefficients: ctx.coefficients,
        final_class_counts: ctx.final_class_counts,
        diagnostics: options.include_diagnostics.then_some(ctx.diagnostics),
    })
}

/// Parses a report batch and decodes it.
pub fn run_decode_json(
    reports_json: &str,
    params: ParameterSet,
    config: &DecodeConfig,
    options: DecodeOptions,
    exec: &ExecutionContext<'_>,
) -> Result<DecodeOutput, CliError> {
    let reports = parse_report_batch(reports_json)?;
    Ok(run_decode(&reports, params, config, options, exec)?)
}

pub fn crate_name() -> &'static str {
    "rrd-cli"
}

#[cfg(test)]
mod tests {
    use super::{CliError, DecodeOptions, parse_report_batch, run_decode_json, strip_bit_prefix};
    use rrd_core::{Constraints, DecodeConfig, ExecutionContext, ParameterSet};
    use serde_json::json;

    fn params16() -> ParameterSet {
        ParameterSet {
            bit_size: 16,
            ..ParameterSet::default()
        }
    }

    #[test]
    fn strips_binary_prefix_only_once() {
        assert_eq!(strip_bit_prefix("0b0101"), "0101");
        assert_eq!(strip_bit_prefix("0101"), "0101");
        assert_eq!(strip_bit_prefix("0b0b1"), "0b1");
    }

    #[test]
    fn parses_plain_report_arrays() {
        let raw = json!([
            {"bits": "0b0101010000100111", "value": 8448},
            {"bits": "0101010000100111", "value": 120, "device_id": "d-1"}
        ])
        .to_string();
        let reports = parse_report_batch(&raw).expect("plain reports");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].bits, "0101010000100111");
        assert_eq!(reports[1].device_id.as_deref(), Some("d-1"));
    }

    #[test]
    fn parses_submission_envelopes() {
        let envelope = json!({
            "parameter_id": "steps",
            "device_id": "device-7",
            "cohort_id": "cohort-a",
            "values": [
                {
                    "report_id": "r-1",
                    "interval_start": "2024-01-01T00:00:00Z",
                    "interval_end": "2024-01-01T23:59:59Z",
                    "steps": 8448,
                    "prr": "0b0101010000100111",
                    "irr": "0b1101010000100111"
                },
                {"steps": 12, "prr": "0101010000100110"}
            ]
        });
        let reports = parse_report_batch(&envelope.to_string()).expect("single envelope");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].bits, "0101010000100111");
        assert_eq!(reports[0].irr.as_deref(), Some("1101010000100111"));
        assert_eq!(reports[0].value, 8448);
        assert_eq!(reports[0].report_id.as_deref(), Some("r-1"));
        assert_eq!(reports[1].cohort_id.as_deref(), Some("cohort-a"));
        assert_eq!(reports[1].parameter_id.as_deref(), Some("steps"));

        let many = json!([envelope.clone(), envelope]).to_string();
        assert_eq!(parse_report_batch(&many).expect("envelope array").len(), 4);
    }

    #[test]
    fn malformed_batches_are_json_errors() {
        let err = parse_report_batch("{\"values\": 3}").expect_err("values must be a list");
        assert_eq!(err.code(), "json_error");
    }

    #[test]
    fn decode_json_renders_one_entry_per_bin() {
        let raw = json!((0..10)
            .map(|i| json!({"bits": "0101010000100111", "value": 100 * i + 5}))
            .collect::<Vec<_>>())
        .to_string();
        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints);
        let options = DecodeOptions {
            refine: true,
            include_diagnostics: true,
        };

        let output = run_decode_json(&raw, params16(), &DecodeConfig::default(), options, &exec)
            .expect("decode succeeds");
        assert_eq!(output.table.len(), 10);
        assert!(output.table.iter().all(|entry| entry.probability >= 0.0));
        assert_eq!(output.final_class_counts.as_ref().map(Vec::len), Some(10));
        let diagnostics = output.diagnostics.as_ref().expect("diagnostics requested");
        assert_eq!(diagnostics.stages.len(), 4);

        let encoded = serde_json::to_value(&output).expect("output serializes");
        assert_eq!(encoded["table"][0]["label"], "0-100");
    }

    #[test]
    fn decode_errors_keep_their_codes() {
        let raw = json!([{"bits": "0101", "value": 1}]).to_string();
        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints);
        let err = run_decode_json(
            &raw,
            params16(),
            &DecodeConfig::default(),
            DecodeOptions::default(),
            &exec,
        )
        .expect_err("4-bit report in a 16-bit decode");
        assert!(matches!(err, CliError::Decode(_)));
        assert_eq!(err.code(), "invalid_input");
    }
}
