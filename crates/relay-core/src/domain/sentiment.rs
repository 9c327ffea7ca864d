//! 심볼별 최신 감성 분석 결과 캐시.
//!
//! 프로세스 전역 상태 대신 명시적으로 생성해 필요한 컴포넌트에 주입합니다.
//! 캐시이므로 같은 키에 대한 동시 쓰기는 마지막 쓰기가 이깁니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 감성 분석 결과 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentEntry {
    /// 분류 라벨 (예: "positive", "negative", "neutral")
    pub label: String,
    /// 신뢰도 점수
    pub score: f64,
    /// 갱신 시각
    pub updated_at: DateTime<Utc>,
}

impl SentimentEntry {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
            updated_at: Utc::now(),
        }
    }
}

/// 감성 캐시 핸들. 복제 비용이 낮고 복제본끼리 같은 저장소를 공유합니다.
#[derive(Debug, Clone, Default)]
pub struct SentimentStore {
    entries: Arc<RwLock<HashMap<String, SentimentEntry>>>,
}

impl SentimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 항목을 기록하고 이전 값을 반환합니다. 심볼은 대문자로 정규화됩니다.
    pub fn record(&self, symbol: &str, entry: SentimentEntry) -> Option<SentimentEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(symbol.to_uppercase(), entry)
    }

    /// 심볼의 최신 항목을 조회합니다.
    pub fn latest(&self, symbol: &str) -> Option<SentimentEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&symbol.to_uppercase()).cloned()
    }

    /// 전체 스냅샷.
    pub fn snapshot(&self) -> HashMap<String, SentimentEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
