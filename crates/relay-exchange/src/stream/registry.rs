//! 토픽 → 구독자 집합 레지스트리.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::Topic;

/// 구독자 식별자.
///
/// 같은 토픽에 같은 식별자로 두 번 등록해도 하나의 항목만 유지됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 토픽별 구독자 집합.
///
/// 집합 의미론을 가지며 토픽 내 순서는 보장하지 않습니다.
#[derive(Debug)]
pub struct TopicRegistry<S> {
    topics: HashMap<Topic, HashMap<SubscriberId, S>>,
}

impl<S> Default for TopicRegistry<S> {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
        }
    }
}

impl<S> TopicRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 구독자를 등록합니다. 같은 식별자가 이미 있으면 교체하고 이전 값을 반환합니다.
    pub fn insert(&mut self, topic: Topic, id: SubscriberId, subscriber: S) -> Option<S> {
        self.topics.entry(topic).or_default().insert(id, subscriber)
    }

    /// 구독자를 제거합니다. 마지막 구독자가 제거되면 토픽 항목도 정리됩니다.
    pub fn remove(&mut self, topic: &Topic, id: &SubscriberId) -> Option<S> {
        let subscribers = self.topics.get_mut(topic)?;
        let removed = subscribers.remove(id);
        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// 토픽의 모든 구독자를 제거해 반환합니다.
    pub fn remove_topic(&mut self, topic: &Topic) -> Vec<(SubscriberId, S)> {
        self.topics
            .remove(topic)
            .map(|subscribers| subscribers.into_iter().collect())
            .unwrap_or_default()
    }

    /// 토픽의 구독자를 다른 토픽으로 옮깁니다. 옮긴 수를 반환합니다.
    ///
    /// 대상 토픽에 같은 식별자가 있으면 옮겨온 항목이 우선합니다.
    pub fn move_topic(&mut self, from: &Topic, to: Topic) -> usize {
        if *from == to {
            return self.subscriber_count(from);
        }
        let moved = self.remove_topic(from);
        let count = moved.len();
        if count > 0 {
            let target = self.topics.entry(to).or_default();
            target.extend(moved);
        }
        count
    }

    /// 토픽의 구독자 목록.
    pub fn subscribers(&self, topic: &Topic) -> impl Iterator<Item = (&SubscriberId, &S)> {
        self.topics.get(topic).into_iter().flat_map(|m| m.iter())
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, HashMap::len)
    }

    pub fn contains(&self, topic: &Topic, id: &SubscriberId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains_key(id))
    }

    /// 구독자가 있는 토픽 목록.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }

    /// 모든 항목을 비우고 반환합니다.
    pub fn drain(&mut self) -> Vec<(Topic, SubscriberId, S)> {
        self.topics
            .drain()
            .flat_map(|(topic, subscribers)| {
                subscribers
                    .into_iter()
                    .map(move |(id, s)| (topic.clone(), id, s))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
