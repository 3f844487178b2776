//! Notification digest rendering.
//!
//! One [`Digest`] is built per config per cycle from the alerts that passed
//! the rule engine. Push uses [`Digest::text_body`]; email uses
//! [`Digest::html_body`] with [`html_to_text`] as the plaintext alternative.
//! Both list at most `max_items` alerts followed by a "+N more" line.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::AlertRecord;

#[derive(Debug, Clone)]
pub struct Digest {
    pub title: String,
    pub alerts: Vec<AlertRecord>,
    max_items: usize,
    detail_url_prefix: String,
}

impl Digest {
    pub fn new(
        title: impl Into<String>,
        alerts: Vec<AlertRecord>,
        max_items: usize,
        detail_url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            alerts,
            max_items: max_items.max(1),
            detail_url_prefix: detail_url_prefix.into(),
        }
    }

    pub fn count(&self) -> usize {
        self.alerts.len()
    }

    /// Alerts rendered in full.
    pub fn shown(&self) -> &[AlertRecord] {
        let end = self.alerts.len().min(self.max_items);
        &self.alerts[..end]
    }

    /// Alerts summarised by the "+N more" line.
    pub fn hidden_count(&self) -> usize {
        self.alerts.len().saturating_sub(self.max_items)
    }

    pub fn short(&self) -> String {
        format!("{}条新增预警", self.count())
    }

    pub fn subject(&self) -> String {
        format!("{} - {}", self.title, self.short())
    }

    pub fn detail_url(&self, alert: &AlertRecord) -> String {
        format!("{}{}", self.detail_url_prefix, alert.detail_link)
    }

    /// Plain-text body for the push channel.
    pub fn text_body(&self) -> String {
        let mut content = format!("发现 {} 条新增预警：\n\n", self.count());

        for alert in self.shown() {
            content.push_str(&format!("【{}】{}预警\n", alert.level_name, alert.type_name));
            content.push_str(&format!("地区：{}\n", alert.region));
            content.push_str(&format!("时间：{}\n", alert.publish_time));
            content.push_str(&format!("详情：{}\n\n", self.detail_url(alert)));
        }

        let hidden = self.hidden_count();
        if hidden > 0 {
            content.push_str(&format!(
                "\n还有 {} 条新增预警未显示，请查看系统详情。",
                hidden
            ));
        }

        content
    }

    /// HTML table body for the email channel.
    pub fn html_body(&self) -> String {
        let cell = "padding: 10px; border: 1px solid #ddd;";

        let rows = self
            .shown()
            .iter()
            .map(|alert| {
                format!(
                    r#"<tr><td style="{cell}">{region}</td><td style="{cell}">{kind}</td><td style="{cell}"><span style="color: {color}; font-weight: bold;">{level}</span></td><td style="{cell}">{time}</td><td style="{cell}"><a href="{url}">详情</a></td></tr>"#,
                    cell = cell,
                    region = escape_html(&alert.region),
                    kind = escape_html(&alert.type_name),
                    color = level_color(&alert.level_name),
                    level = escape_html(&alert.level_name),
                    time = escape_html(&alert.publish_time),
                    url = escape_html(&self.detail_url(alert)),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let hidden = self.hidden_count();
        let more = if hidden > 0 {
            format!("<p>还有 {} 条新增预警未显示，请查看系统详情。</p>", hidden)
        } else {
            String::new()
        };

        format!(
            r#"<h2>{title}</h2>
<p>发现 {count} 条新增预警：</p>
<table border="1" style="border-collapse: collapse; width: 100%; margin: 20px 0;">
<thead><tr style="background-color: #f5f5f5;"><th style="{cell}">地区</th><th style="{cell}">类型</th><th style="{cell}">等级</th><th style="{cell}">时间</th><th style="{cell}">链接</th></tr></thead>
<tbody>
{rows}
</tbody>
</table>
{more}
<hr>
<p style="color: #666; font-size: 12px;">此邮件由气象预警系统自动发送，请勿回复。</p>"#,
            title = escape_html(&self.title),
            count = self.count(),
            cell = cell,
            rows = rows,
            more = more,
        )
    }
}

fn level_color(level_name: &str) -> &'static str {
    match level_name {
        "红色" => "#dc3545",
        "橙色" => "#fd7e14",
        "黄色" => "#ffc107",
        "蓝色" => "#007bff",
        _ => "#6c757d",
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Derive a plaintext body by stripping markup and collapsing whitespace.
pub fn html_to_text(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("space pattern is valid"));

    let stripped = tag.replace_all(html, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    space.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(n: usize, level: &str) -> AlertRecord {
        AlertRecord {
            id: n as i64,
            region: format!("地区{}", n),
            region_code: "10101".to_string(),
            publish_time: "2024-01-01 12:00:00".to_string(),
            type_code: "02".to_string(),
            type_name: "暴雨".to_string(),
            level_code: "04".to_string(),
            level_name: level.to_string(),
            detail_link: format!("10101-20240101120000-020{}", n),
            longitude: None,
            latitude: None,
            batch_id: "b".to_string(),
            write_time: Utc::now(),
        }
    }

    #[test]
    fn test_text_body_caps_items_with_more_suffix() {
        let alerts = (0..13).map(|n| alert(n, "红色")).collect();
        let digest = Digest::new("气象预警通知", alerts, 10, "https://x/?file=");
        let body = digest.text_body();

        assert!(body.starts_with("发现 13 条新增预警"));
        assert_eq!(body.matches("地区：").count(), 10);
        assert!(body.contains("还有 3 条新增预警未显示"));
        assert!(body.contains("https://x/?file=10101-20240101120000-0200"));
    }

    #[test]
    fn test_no_suffix_under_cap() {
        let digest = Digest::new("t", vec![alert(1, "蓝色")], 10, "");
        assert_eq!(digest.hidden_count(), 0);
        assert!(!digest.text_body().contains("还有"));
        assert_eq!(digest.subject(), "t - 1条新增预警");
    }

    #[test]
    fn test_html_body_colors_and_escapes() {
        let mut a = alert(1, "橙色");
        a.region = "<script>".to_string();
        let digest = Digest::new("t", vec![a], 10, "");
        let html = digest.html_body();
        assert!(html.contains("#fd7e14"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text("<h2>Title</h2>\n<p>a &amp; b&nbsp;&lt;c&gt;</p>");
        assert_eq!(text, "Title a & b <c>");
    }
}
