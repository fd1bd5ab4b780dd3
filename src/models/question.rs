use serde::{Deserialize, Serialize};

/// 问题
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// 报告名（不含扩展名），用于匹配转换后的 markdown 文件
    pub report_name: String,
    pub question_id: String,
    pub question: String,
    pub ground_truth: String,
    pub slide_number: i64,
    pub layout_element: String,
}

/// 评判结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    /// 逐步推理
    pub reasoning: String,
    /// 答案是否与标准答案一致
    pub correct: bool,
}

impl Evaluation {
    /// 失败时的评判结果，`correct` 恒为 false
    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            correct: false,
        }
    }
}

/// 针对某一份转换报告的回答
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportAnswer {
    pub report_filename: String,
    pub answer: String,
    pub model: String,
    #[serde(default)]
    pub conversion_error: bool,
    #[serde(default)]
    pub generation_error: bool,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
}

/// 问题及其在所有报告上的回答
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionAnswer {
    #[serde(flatten)]
    pub question: Question,
    #[serde(default)]
    pub report_answers: Vec<ReportAnswer>,
}

impl From<Question> for QuestionAnswer {
    fn from(question: Question) -> Self {
        Self {
            question,
            report_answers: Vec::new(),
        }
    }
}
