//! 외부 헬퍼 프로세스 실행기.
//!
//! 감성 분석/가격 예측 스크립트를 자식 프로세스로 실행합니다.
//! 요청 JSON을 stdin으로 보내고 stdout의 JSON 객체 하나를 응답으로 읽습니다.
//! 응답에 `error` 필드가 있으면 실패로 처리합니다.

use relay_core::{SentimentEntry, SentimentStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// 헬퍼 실행 오류.
#[derive(Debug, Error)]
pub enum HelperError {
    /// 프로세스 시작 실패
    #[error("헬퍼 실행 실패: {0}")]
    Spawn(String),

    /// 입출력 오류
    #[error("헬퍼 입출력 오류: {0}")]
    Io(#[from] std::io::Error),

    /// 제한 시간 초과
    #[error("헬퍼 응답 시간 초과 ({0:?})")]
    Timeout(Duration),

    /// 헬퍼가 보고한 실패
    #[error("헬퍼 오류: {0}")]
    Failed(String),

    /// 해석할 수 없는 출력
    #[error("헬퍼 출력 형식 오류: {0}")]
    InvalidOutput(String),
}

impl From<serde_json::Error> for HelperError {
    fn from(err: serde_json::Error) -> Self {
        HelperError::InvalidOutput(err.to_string())
    }
}

/// 헬퍼 결과 타입.
pub type HelperResult<T> = Result<T, HelperError>;

/// 헬퍼 요청.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HelperRequest {
    /// 감성 분석 (`{"text": ...}`)
    Sentiment { text: String },
    /// 가격 예측 (`{"features": [[...], ...]}`)
    Prediction { features: Vec<Vec<f64>> },
}

/// 감성 분석 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub sentiment: String,
    pub score: f64,
    #[serde(default)]
    pub probabilities: HashMap<String, f64>,
}

/// 가격 예측 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// 예상 변화율 (%)
    pub prediction_pct_change: f64,
    /// 1 = 매수, -1 = 매도
    pub signal: i8,
}

/// 헬퍼 프로세스 실행기.
#[derive(Debug, Clone)]
pub struct HelperRunner {
    program: OsString,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl HelperRunner {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `python3 <script>` 실행기.
    pub fn python(script: impl AsRef<Path>) -> Self {
        Self::new("python3").with_arg(script.as_ref())
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 요청을 보내고 응답을 역직렬화합니다.
    pub async fn invoke<Req, Resp>(&self, request: &Req) -> HelperResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let program = self.program.to_string_lossy().into_owned();
        debug!(program = %program, bytes = payload.len(), "Spawning helper");

        let mut child = cmd
            .spawn()
            .map_err(|e| HelperError::Spawn(format!("{}: {}", program, e)))?;

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| HelperError::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let response = last_json_object(&stdout);

        if let Some(message) = response
            .as_ref()
            .and_then(|v| v.get("error"))
            .filter(|e| !e.is_null())
        {
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            warn!(program = %program, error = %message, "Helper reported an error");
            return Err(HelperError::Failed(message));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().last().unwrap_or_default().trim().to_string();
            return Err(HelperError::Failed(format!(
                "exited with {}: {}",
                output.status, tail
            )));
        }

        match response {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(HelperError::InvalidOutput(
                "stdout did not contain a JSON object".to_string(),
            )),
        }
    }

    /// 텍스트 감성을 분석하고 결과를 심볼별 캐시에 기록합니다.
    pub async fn analyze_sentiment(
        &self,
        store: &SentimentStore,
        symbol: &str,
        text: &str,
    ) -> HelperResult<SentimentResult> {
        let request = HelperRequest::Sentiment {
            text: text.to_string(),
        };
        let result: SentimentResult = self.invoke(&request).await?;

        store.record(symbol, SentimentEntry::new(&result.sentiment, result.score));
        info!(
            symbol = %symbol.to_uppercase(),
            sentiment = %result.sentiment,
            score = result.score,
            "Sentiment updated"
        );
        Ok(result)
    }

    /// 특성 행렬로 가격 변화를 예측합니다.
    pub async fn predict_price(&self, features: Vec<Vec<f64>>) -> HelperResult<PredictionResult> {
        self.invoke(&HelperRequest::Prediction { features }).await
    }
}

/// 출력에서 마지막 JSON 객체 줄을 찾습니다.
fn last_json_object(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
}
