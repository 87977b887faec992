use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use coze_client::{display_value, NormalizedContent, PayloadSchema, REPORT_FIELDS};
use policy_common::ComparisonRecord;

const PANDOC_TIMEOUT: Duration = Duration::from_secs(30);

fn section_heading(field: &str) -> &'static str {
    match field {
        "summary" => "总结",
        "added" => "新增内容",
        "modified" => "修改内容",
        "deleted" => "删除内容",
        "statistics" => "统计",
        "detailed" => "详细对比",
        _ => "其他",
    }
}

/// Render a record as a markdown report.
pub fn render_markdown(record: &ComparisonRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", record.title);
    let _ = writeln!(out, "- 城市: {}", record.city);
    let _ = writeln!(out, "- 类型: {}", record.kind.label());
    let _ = writeln!(
        out,
        "- 文件: {} / {}",
        record.current_file.name, record.previous_file.name
    );
    let _ = writeln!(out, "- 生成时间: {}", record.created_at.format("%Y-%m-%d %H:%M"));
    if record.reviewed {
        let _ = writeln!(
            out,
            "- 审核: {} ({})",
            record.reviewed_by.as_deref().unwrap_or("-"),
            record
                .reviewed_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        );
    }
    if record.best_effort {
        let _ = writeln!(out, "\n> 注意: 对比结果未能解析为结构化数据，以下为原始输出。");
    }
    out.push('\n');

    match NormalizedContent::from_value(record.content.clone()) {
        NormalizedContent::Structured(payload) => match payload.schema {
            PayloadSchema::ComparisonReport => {
                for field in REPORT_FIELDS {
                    if let Some(section) = payload.report_section(field) {
                        let _ = writeln!(out, "## {}\n", section_heading(field));
                        render_value(&mut out, section);
                        out.push('\n');
                    }
                }
            }
            PayloadSchema::Checklist => {
                out.push_str("| 编号 | 条目 | 状态 | 匹配内容 |\n");
                out.push_str("| --- | --- | --- | --- |\n");
                for item in payload.checklist_items() {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} |",
                        table_cell(&item.id),
                        table_cell(&item.name),
                        table_cell(&item.status),
                        table_cell(&item.matched)
                    );
                }
            }
        },
        NormalizedContent::FreeText(Value::String(text)) => {
            out.push_str(&text);
            out.push('\n');
        }
        NormalizedContent::FreeText(Value::Null) => {
            out.push_str("(无内容)\n");
        }
        NormalizedContent::FreeText(other) => {
            let pretty = serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string());
            let _ = writeln!(out, "```json\n{pretty}\n```");
        }
    }

    out
}

fn render_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        let _ = writeln!(out, "- {}", compact_object(item));
                    }
                    scalar => {
                        let _ = writeln!(out, "- {}", display_value(scalar));
                    }
                }
            }
        }
        Value::Object(map) => {
            for (key, v) in map {
                let _ = writeln!(out, "- {key}: {}", compact_object(v));
            }
        }
        scalar => {
            let _ = writeln!(out, "{}", display_value(scalar));
        }
    }
}

/// One-line rendering of nested values: `key: value; key: value`.
fn compact_object(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", compact_object(v)))
            .collect::<Vec<_>>()
            .join("; "),
        Value::Array(items) => items.iter().map(compact_object).collect::<Vec<_>>().join(", "),
        scalar => display_value(scalar),
    }
}

fn table_cell(value: &Value) -> String {
    compact_object(value).replace('|', "\\|").replace('\n', "<br>")
}

/// Convert markdown to PDF with the external converter binary.
pub async fn markdown_to_pdf(pandoc_bin: &str, markdown: &str) -> Result<Vec<u8>> {
    let mut command = tokio::process::Command::new(pandoc_bin);
    command.args(["--from", "markdown", "--to", "pdf", "--output", "-"]);
    run_converter(command, markdown, PANDOC_TIMEOUT)
        .await
        .with_context(|| format!("{pandoc_bin} failed"))
}

/// Feed `input` on stdin and collect stdout. Writing and waiting share one
/// deadline, so a converter that stops reading cannot hang the caller.
async fn run_converter(
    mut command: tokio::process::Command,
    input: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to launch converter")?;

    let mut stdin = child.stdin.take().context("converter stdin unavailable")?;
    let feed = async move {
        let written = stdin.write_all(input.as_bytes()).await;
        // Dropping stdin closes the pipe so the converter sees EOF.
        drop(stdin);
        written
    };

    let (fed, output) = tokio::time::timeout(timeout, async {
        tokio::join!(feed, child.wait_with_output())
    })
    .await
    .with_context(|| format!("converter timed out after {}s", timeout.as_secs_f32()))?;

    let output = output?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("converter exited with {}: {stderr}", output.status);
    }
    fed.context("failed to write converter input")?;
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use policy_common::{ComparisonKind, FileRef};
    use serde_json::json;
    use uuid::Uuid;

    fn record(content: Value, content_kind: &str) -> ComparisonRecord {
        ComparisonRecord {
            id: Uuid::new_v4(),
            kind: ComparisonKind::Policy,
            city: "杭州".to_string(),
            title: "2025 对比".to_string(),
            current_file: FileRef {
                name: "2025.pdf".to_string(),
                url: "https://cdn.example/2025.pdf".to_string(),
            },
            previous_file: FileRef {
                name: "2024.pdf".to_string(),
                url: "https://cdn.example/2024.pdf".to_string(),
            },
            raw_response: json!({}),
            content_kind: content_kind.to_string(),
            content,
            best_effort: false,
            attempts: 1,
            reviewed: false,
            reviewed_by: None,
            reviewed_at: None,
            created_by: "hangzhou".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn report_sections_render_in_fixed_order() {
        let md = render_markdown(&record(
            json!({
                "detailed": "第三条有调整",
                "summary": "整体变化不大",
                "added": ["新增门诊报销"],
                "statistics": { "added": 1, "deleted": 0 },
            }),
            "structured",
        ));
        let summary = md.find("## 总结").unwrap();
        let added = md.find("## 新增内容").unwrap();
        let stats = md.find("## 统计").unwrap();
        let detailed = md.find("## 详细对比").unwrap();
        assert!(summary < added && added < stats && stats < detailed);
        assert!(md.contains("- 新增门诊报销"));
        assert!(md.contains("- added: 1"));
        assert!(!md.contains("## 删除内容"));
    }

    #[test]
    fn checklist_renders_as_table() {
        let md = render_markdown(&record(
            json!([
                { "id": 1, "name": "消防通道", "status": "满足", "matched": true },
                { "id": 2, "name": "急救|设备", "status": "不满足" },
            ]),
            "structured",
        ));
        assert!(md.contains("| 1 | 消防通道 | 满足 | 是 |"));
        assert!(md.contains("| 2 | 急救\\|设备 | 不满足 |  |"));
    }

    #[test]
    fn free_text_is_emitted_verbatim() {
        let mut r = record(json!("## 原始输出\n两份文件一致"), "free_text");
        r.best_effort = true;
        let md = render_markdown(&r);
        assert!(md.contains("## 原始输出\n两份文件一致"));
        assert!(md.contains("注意"));
    }

    #[test]
    fn opaque_json_is_fenced() {
        let md = render_markdown(&record(json!({ "output": "x" }), "free_text"));
        assert!(md.contains("```json"));
        assert!(md.contains("\"output\": \"x\""));
    }

    #[test]
    fn review_line_appears_once_signed_off() {
        let mut r = record(json!({ "summary": "s" }), "structured");
        r.reviewed = true;
        r.reviewed_by = Some("auditor".to_string());
        r.reviewed_at = Some(Utc::now());
        assert!(render_markdown(&r).contains("- 审核: auditor"));
    }

    #[tokio::test]
    async fn missing_converter_is_an_error() {
        let err = markdown_to_pdf("/nonexistent/pandoc-binary", "# hi").await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converter_output_is_collected() {
        let out = run_converter(
            tokio::process::Command::new("cat"),
            "# 报告",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out, "# 报告".as_bytes());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converter_that_stops_reading_times_out() {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", "sleep 30"]);
        // Far larger than a pipe buffer, so the write blocks until the deadline.
        let input = "x".repeat(4 * 1024 * 1024);

        let started = std::time::Instant::now();
        let err = run_converter(command, &input, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
