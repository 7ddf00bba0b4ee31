//! Detail panel markup for a school.

use maud::{html, Markup};

use crate::{config::tier_color, record::SchoolRecord};

const FONT_STACK: &str =
    "'PingFang SC', 'Microsoft YaHei', 'Hiragino Sans GB', 'WenQuanYi Micro Hei', sans-serif";

/// Labeled lines shown under the heading, in display order. Absent fields
/// produce no line.
fn detail_lines(record: &SchoolRecord) -> Vec<(&'static str, String)> {
    let mut lines = vec![("梯队", record.tier.label().to_string())];
    let mut push = |label, value: Option<String>| {
        if let Some(v) = value {
            lines.push((label, v));
        }
    };
    let features = record.features.as_ref();

    push("描述", record.description.clone());
    push("统招线", record.score.map(|s| s.to_string()));
    push("区排名", record.district_rank.clone());
    push("2025年招生", record.enrollment_2025.map(|n| format!("{n}人")));
    push("报名人数", record.applicants.map(|n| format!("{n}人")));
    push("中签率", record.acceptance_rate.clone());
    push("特色优势", features.and_then(|f| f.advantages.clone()));
    push(
        "升学方向",
        features
            .filter(|f| !f.education_path.is_empty())
            .map(|f| f.education_path.join(" / ")),
    );
    push("地址", record.address.clone());
    lines
}

pub fn markup(record: &SchoolRecord) -> Markup {
    let color = tier_color(&record.tier).hex();
    let heading_style = format!(
        "margin: 0 0 10px 0; color: {color}; border-bottom: 2px solid {color}; \
         padding-bottom: 5px; font-size: 16px;"
    );
    html! {
        div style={ "padding: 10px; max-width: 300px; font-family: " (FONT_STACK) ";" } {
            h3 style=(heading_style) { (record.name) }
            div style="font-size: 14px; line-height: 1.5;" {
                @for (label, value) in detail_lines(record) {
                    p style="margin: 5px 0;" {
                        strong { (label) "：" }
                        (value)
                    }
                }
            }
        }
    }
}

/// Popup content for `record` as an HTML fragment. Every record value is
/// escaped.
pub fn format(record: &SchoolRecord) -> String {
    markup(record).into_string()
}
