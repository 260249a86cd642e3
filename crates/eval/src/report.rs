//! Report rendering and history persistence

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use bookwise_core::{Error, Result};

use crate::types::{AverageScores, EvaluationRecord};

/// Compute per-metric averages over a batch
pub fn averages(records: &[EvaluationRecord]) -> AverageScores {
    if records.is_empty() {
        return AverageScores::default();
    }
    let n = records.len() as f64;
    AverageScores {
        faithfulness: records.iter().map(|r| r.faithfulness_score).sum::<f64>() / n,
        relevance: records.iter().map(|r| r.relevance_score).sum::<f64>() / n,
        context_precision: records.iter().map(|r| r.context_precision_score).sum::<f64>() / n,
        answer_similarity: records.iter().map(|r| r.answer_similarity_score).sum::<f64>() / n,
    }
}

/// Render the Markdown evaluation report: overall averages with high-score
/// rates, a per-question table, and a short conclusion.
pub fn render_markdown(records: &[EvaluationRecord]) -> String {
    let avg = averages(records);
    let n = records.len();
    let high_rate = |f: fn(&EvaluationRecord) -> f64| {
        let count = records.iter().filter(|r| f(r) >= 0.8).count();
        (count, count as f64 / n.max(1) as f64 * 100.0)
    };

    let mut report = String::new();
    report.push_str("# RAG Evaluation Report\n\n");
    report.push_str(&format!(
        "Generated: {}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report.push_str(&format!("Total questions: {n}\n\n"));

    report.push_str("## Overall scores\n\n");
    report.push_str("| Metric | Average | High rate (>= 0.8) |\n");
    report.push_str("|--------|---------|--------------------|\n");
    let (count, rate) = high_rate(|r| r.faithfulness_score);
    report.push_str(&format!(
        "| **Faithfulness** | {:.3} | {count} ({rate:.1}%) |\n",
        avg.faithfulness
    ));
    let (count, rate) = high_rate(|r| r.relevance_score);
    report.push_str(&format!(
        "| **Relevance** | {:.3} | {count} ({rate:.1}%) |\n",
        avg.relevance
    ));
    let (count, rate) = high_rate(|r| r.context_precision_score);
    report.push_str(&format!(
        "| **Context Precision** | {:.3} | {count} ({rate:.1}%) |\n",
        avg.context_precision
    ));
    let (count, rate) = high_rate(|r| r.answer_similarity_score);
    report.push_str(&format!(
        "| **Answer Similarity** | {:.3} | {count} ({rate:.1}%) |\n\n",
        avg.answer_similarity
    ));

    report.push_str("## Per-question results\n\n");
    report.push_str("| # | Question | Faithfulness | Relevance | Ctx. Precision | Ans. Similarity |\n");
    report.push_str("|---|----------|--------------|-----------|----------------|------------------|\n");
    for (i, record) in records.iter().enumerate() {
        let question: String = if record.question.chars().count() > 50 {
            format!("{}...", record.question.chars().take(50).collect::<String>())
        } else {
            record.question.clone()
        };
        report.push_str(&format!(
            "| {} | {} | {:.3} | {:.3} | {:.3} | {:.3} |\n",
            i + 1,
            question.replace('|', "\\|"),
            record.faithfulness_score,
            record.relevance_score,
            record.context_precision_score,
            record.answer_similarity_score,
        ));
    }

    report.push_str("\n## Conclusion\n\n");
    report.push_str(&format!(
        "Evaluated {n} questions. Faithfulness averaged {:.3} and relevance {:.3} (of 1.0).\n\n",
        avg.faithfulness, avg.relevance
    ));
    if avg.faithfulness >= 0.8 && avg.relevance >= 0.8 {
        report.push_str("The system performs well on both accuracy and relevance.\n");
    } else if avg.faithfulness >= 0.6 && avg.relevance >= 0.6 {
        report.push_str("Acceptable results with room for improvement.\n");
    } else {
        report.push_str("Accuracy and relevance need attention.\n");
    }

    report
}

/// Write the Markdown report to disk
pub fn write_report(path: impl AsRef<Path>, records: &[EvaluationRecord]) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(path, render_markdown(records))?;
    info!(path = %path.display(), "evaluation report written");
    Ok(path.to_path_buf())
}

/// Dated history snapshot, written only once all scoring has finished
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub date: String,
    pub timestamp: String,
    pub num_questions: usize,
    pub average_scores: AverageScores,
    pub results: Vec<EvaluationRecord>,
}

/// Append a dated snapshot under `history_dir` as
/// `evaluation_YYYYMMDD.json`
pub fn write_history(
    history_dir: impl AsRef<Path>,
    records: &[EvaluationRecord],
) -> Result<PathBuf> {
    let dir = history_dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let now = Local::now();
    let snapshot = HistorySnapshot {
        date: now.format("%Y-%m-%d").to_string(),
        timestamp: now.to_rfc3339(),
        num_questions: records.len(),
        average_scores: averages(records),
        results: records.to_vec(),
    };

    let path = dir.join(format!("evaluation_{}.json", now.format("%Y%m%d")));
    let serialized = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Error::Eval(format!("serialising history: {e}")))?;
    std::fs::write(&path, serialized)?;
    info!(path = %path.display(), "evaluation history written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(f: f64, r: f64) -> EvaluationRecord {
        EvaluationRecord {
            question: "What is a singleton pattern used for?".into(),
            rag_answer: "Ensuring one instance.".into(),
            ground_truth: "A class with a single instance.".into(),
            faithfulness_score: f,
            relevance_score: r,
            context_precision_score: 0.5,
            answer_similarity_score: 0.4,
            judge_reasoning: "ok".into(),
            sources_used: vec!["Item 3 text".into()],
        }
    }

    #[test]
    fn test_averages() {
        let avg = averages(&[record(1.0, 0.8), record(0.5, 0.4)]);
        assert!((avg.faithfulness - 0.75).abs() < 1e-9);
        assert!((avg.relevance - 0.6).abs() < 1e-9);
        assert!((avg.context_precision - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_averages_empty() {
        let avg = averages(&[]);
        assert_eq!(avg.faithfulness, 0.0);
    }

    #[test]
    fn test_markdown_report_structure() {
        let report = render_markdown(&[record(0.9, 0.9), record(0.85, 0.8)]);
        assert!(report.contains("# RAG Evaluation Report"));
        assert!(report.contains("**Faithfulness**"));
        assert!(report.contains("**Context Precision**"));
        assert!(report.contains("| 1 |"));
        assert!(report.contains("| 2 |"));
        assert!(report.contains("performs well"));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let mut r = record(0.2, 0.2);
        r.question = "weird | question".into();
        let report = render_markdown(&[r]);
        assert!(report.contains("weird \\| question"));
    }

    #[test]
    fn test_history_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_history(dir.path(), &[record(0.9, 0.9)]).unwrap();
        assert!(path.exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: HistorySnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.num_questions, 1);
        assert!(raw.contains("averageScores"));
        assert!(raw.contains("numQuestions"));
    }
}
