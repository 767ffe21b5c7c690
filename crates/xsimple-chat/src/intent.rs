//! Keyword intent resolver.
//!
//! A lookup table standing in for a real model: the first rule with a
//! keyword contained in the query decides the canned answer and the report.
//! Queries matching no rule get the demo narrative and no report.

use std::sync::LazyLock;

use xsimple_core::{Intent, IntentResult, ReportPayload, SeriesPoint};

const SALES_RESPONSE: &str = "好的，我正在为您生成**2023年度销售报表**。\n\n根据数据显示，第四季度的增长尤为明显，主要得益于双十一活动的推广。右侧将为您展示详细的趋势图表。";

const USER_GROWTH_RESPONSE: &str = "好的，我正在为您生成**上半年用户增长报表**。\n\n新增用户连续六个月保持增长，6月环比增幅最大。右侧将为您展示月度新增用户趋势。";

const FINANCE_RESPONSE: &str = "好的，我正在为您生成**上半年财务报表**。\n\n整体收支保持平衡，3月因集中采购出现阶段性亏损，二季度净利润逐月回升。右侧将为您展示月度净利润走势。";

const DEMO_RESPONSE: &str = "收到，但我是一个演示模型。如果您输入包含“**销售**”的指令，我将演示报表可视化的生成过程。";

const MONTHS: [&str; 6] = ["1月", "2月", "3月", "4月", "5月", "6月"];

fn monthly_series(values: [f64; 6]) -> Vec<SeriesPoint> {
    MONTHS
        .iter()
        .zip(values)
        .map(|(label, value)| SeriesPoint::new(*label, value))
        .collect()
}

/// One keyword -> template entry of the lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRule {
    pub intent: Intent,
    /// Lower-cased keywords; any one contained in the lower-cased query matches.
    keywords: Vec<String>,
    pub response_text: String,
    pub report: Option<ReportPayload>,
}

impl IntentRule {
    pub fn new<I, K>(
        intent: Intent,
        keywords: I,
        response_text: impl Into<String>,
        report: Option<ReportPayload>,
    ) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Self {
            intent,
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            response_text: response_text.into(),
            report,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// `lowered_query` must already be lower-cased.
    fn matches(&self, lowered_query: &str) -> bool {
        self.keywords.iter().any(|k| lowered_query.contains(k.as_str()))
    }

    fn to_result(&self) -> IntentResult {
        IntentResult {
            intent: self.intent,
            response_text: self.response_text.clone(),
            report: self.report.clone(),
        }
    }
}

static DEFAULT_RULES: LazyLock<Vec<IntentRule>> = LazyLock::new(|| {
    vec![
        IntentRule::new(
            Intent::Sales,
            ["销售", "sales"],
            SALES_RESPONSE,
            Some(ReportPayload {
                title: "年度销售趋势分析".to_string(),
                series: monthly_series([4000.0, 3000.0, 2000.0, 2780.0, 1890.0, 2390.0]),
                insights: vec![
                    "数据呈现明显的季节性波动趋势，可据此调整营销策略。".to_string(),
                    "峰值出现在近期，表明策略调整有效，应继续保持。".to_string(),
                    "AI 建议：保持当前增长势头，重点关注用户留存率和转化漏斗优化。".to_string(),
                ],
            }),
        ),
        IntentRule::new(
            Intent::UserGrowth,
            ["用户增长", "user growth"],
            USER_GROWTH_RESPONSE,
            Some(ReportPayload {
                title: "用户增长趋势分析".to_string(),
                series: monthly_series([1200.0, 1350.0, 1580.0, 1720.0, 2010.0, 2460.0]),
                insights: vec![
                    "新增用户连续六个月保持正增长。".to_string(),
                    "6月增速最快，与新版本上线时间吻合。".to_string(),
                ],
            }),
        ),
        IntentRule::new(
            Intent::Finance,
            ["财务", "finance"],
            FINANCE_RESPONSE,
            Some(ReportPayload {
                title: "财务收支概览".to_string(),
                series: monthly_series([820.0, 760.0, -150.0, 540.0, 690.0, 910.0]),
                insights: vec![
                    "3月出现阶段性亏损，主要来自一次性采购支出。".to_string(),
                    "二季度净利润逐月回升。".to_string(),
                ],
            }),
        ),
    ]
});

/// Maps a raw query to the answer to stream and the optional report.
///
/// Pure and total: the result depends only on the query and the rule table.
#[derive(Debug, Clone)]
pub struct IntentResolver {
    rules: Vec<IntentRule>,
    fallback_text: String,
}

impl Default for IntentResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentResolver {
    /// Resolver with the built-in sales, user-growth, and finance rules.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
            fallback_text: DEMO_RESPONSE.to_string(),
        }
    }

    /// Resolver with no rules; every query gets the fallback narrative.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fallback_text: DEMO_RESPONSE.to_string(),
        }
    }

    /// Append a rule, checked after every existing one.
    pub fn with_rule(mut self, rule: IntentRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = text.into();
        self
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    pub fn resolve(&self, query: &str) -> IntentResult {
        let lowered = query.to_lowercase();
        match self.rules.iter().find(|rule| rule.matches(&lowered)) {
            Some(rule) => rule.to_result(),
            None => IntentResult {
                intent: Intent::Demo,
                response_text: self.fallback_text.clone(),
                report: None,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
