use crate::models::question::{Question, QuestionAnswer};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// 从 JSON 文件加载问题列表
pub async fn load_questions(questions_file: &Path) -> Result<Vec<Question>> {
    tracing::info!("正在加载问题: {}", questions_file.display());

    let content = fs::read_to_string(questions_file)
        .await
        .with_context(|| format!("无法读取问题文件: {}", questions_file.display()))?;

    let questions: Vec<Question> = serde_json::from_str(&content)
        .with_context(|| format!("无法解析问题文件: {}", questions_file.display()))?;

    if let Some(q) = questions.iter().find(|q| q.report_name.is_empty()) {
        anyhow::bail!("问题 {} 的 report_name 不能为空", q.question_id);
    }

    tracing::info!("成功加载并校验 {} 个问题", questions.len());
    Ok(questions)
}

/// 从 JSON 文件加载带回答的问题列表
pub async fn load_answers(answers_file: &Path) -> Result<Vec<QuestionAnswer>> {
    tracing::info!("正在加载回答: {}", answers_file.display());

    let content = fs::read_to_string(answers_file)
        .await
        .with_context(|| format!("无法读取回答文件: {}", answers_file.display()))?;

    let answers: Vec<QuestionAnswer> = serde_json::from_str(&content)
        .with_context(|| format!("无法解析回答文件: {}", answers_file.display()))?;

    tracing::info!("成功加载 {} 个带回答的问题", answers.len());
    Ok(answers)
}

/// 以缩进格式写出 JSON，必要时创建父目录
pub async fn write_json<T: Serialize + ?Sized>(data: &T, file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("无法创建目录: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(data)?;
    fs::write(file_path, json)
        .await
        .with_context(|| format!("无法写入文件: {}", file_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_questions_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/questions.json");

        let questions = vec![Question {
            report_name: "acme".to_string(),
            question_id: "q1".to_string(),
            question: "Who is the CEO?".to_string(),
            ground_truth: "Jane".to_string(),
            slide_number: 1,
            layout_element: "text".to_string(),
        }];

        write_json(&questions, &path).await.unwrap();
        let loaded = load_questions(&path).await.unwrap();
        assert_eq!(loaded, questions);
    }

    #[tokio::test]
    async fn test_empty_report_name_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("questions.json");
        std::fs::write(
            &path,
            r#"[{"report_name":"","question_id":"q9","question":"?","ground_truth":"!","slide_number":0,"layout_element":"x"}]"#,
        )
        .unwrap();

        let err = load_questions(&path).await.unwrap_err();
        assert!(err.to_string().contains("q9"));
    }
}
