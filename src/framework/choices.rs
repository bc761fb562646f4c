//! 选项识别
//!
//! 宿主框架提供的 findChoices 能力在这里以 `ChoiceRecognizer` trait 表达；
//! `TokenChoiceRecognizer` 是一个基于词元重合度的简单实现，足以驱动菜单识别。

use serde::{Deserialize, Serialize};

/// 待识别的选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl Choice {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            title: None,
            synonyms: Vec::new(),
        }
    }
}

/// 识别结果：命中选项的值、在候选列表中的下标、得分（0.0–1.0）
#[derive(Debug, Clone, PartialEq)]
pub struct FoundChoice {
    pub value: String,
    pub index: usize,
    pub score: f64,
    /// 命中的具体文本（value / title / 同义词之一）
    pub synonym: String,
}

/// 选项识别器
pub trait ChoiceRecognizer: Send + Sync {
    /// 按得分从高到低返回命中的选项
    fn find_choices(&self, utterance: &str, choices: &[Choice]) -> Vec<FoundChoice>;
}

/// 词元重合度识别器
///
/// 归一化（小写、去标点）后完全相等得 1.0；否则得分 = 按序命中的词元数 / max(候选词元数, 输入词元数)。
#[derive(Debug, Default, Clone)]
pub struct TokenChoiceRecognizer;

impl TokenChoiceRecognizer {
    pub fn new() -> Self {
        Self
    }

    fn score(utterance: &[String], candidate: &[String]) -> f64 {
        if candidate.is_empty() || utterance.is_empty() {
            return 0.0;
        }
        if utterance == candidate {
            return 1.0;
        }

        let mut matched = 0usize;
        let mut start = 0usize;
        for token in candidate {
            if let Some(pos) = utterance[start..].iter().position(|t| t == token) {
                matched += 1;
                start += pos + 1;
            }
        }

        matched as f64 / candidate.len().max(utterance.len()) as f64
    }
}

/// 小写并按非字母数字切分
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ChoiceRecognizer for TokenChoiceRecognizer {
    fn find_choices(&self, utterance: &str, choices: &[Choice]) -> Vec<FoundChoice> {
        let tokens = tokenize(utterance);
        let mut found: Vec<FoundChoice> = choices
            .iter()
            .enumerate()
            .filter_map(|(index, choice)| {
                std::iter::once(&choice.value)
                    .chain(choice.title.iter())
                    .chain(choice.synonyms.iter())
                    .map(|candidate| (candidate, Self::score(&tokens, &tokenize(candidate))))
                    .filter(|(_, score)| *score > 0.0)
                    .fold(None, |best: Option<(&String, f64)>, (c, s)| match best {
                        Some((_, bs)) if bs >= s => best,
                        _ => Some((c, s)),
                    })
                    .map(|(candidate, score)| FoundChoice {
                        value: choice.value.clone(),
                        index,
                        score,
                        synonym: candidate.clone(),
                    })
            })
            .collect();

        // 稳定排序：同分保持声明顺序
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        found
    }
}
