//! Records returned by the server API.
//!
//! These mirror the server's JSON shapes; unknown fields are ignored so the
//! CLI keeps working against newer servers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PomodoroState {
    Active,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Work => "work",
            Self::ShortBreak => "short break",
            Self::LongBreak => "long break",
        })
    }
}

impl fmt::Display for PomodoroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Finished => "finished",
        })
    }
}

/// A session as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pomodoro {
    pub id: String,
    pub state: PomodoroState,
    pub phase: Phase,
    pub phase_count: u32,
    pub start_time: DateTime<Utc>,
    pub work_duration_secs: u64,
    pub break_duration_secs: u64,
    pub long_break_duration_secs: u64,
    pub remaining_secs: u64,
    pub elapsed_secs: u64,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// One line: `#3 short break  paused  04:12 left  <id>`.
impl fmt::Display for Pomodoro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}  {}  {:02}:{:02} left  {}",
            self.phase_count,
            self.phase,
            self.state,
            self.remaining_secs / 60,
            self.remaining_secs % 60,
            self.id
        )?;
        if let Some(ref task_id) = self.task_id {
            write!(f, "  task {task_id}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

/// `[x] title  <id>`
impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.completed { 'x' } else { ' ' };
        write!(f, "[{mark}] {}  {}", self.title, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pomodoro_parses_server_json() {
        let session: Pomodoro = serde_json::from_value(json!({
            "id": "p1",
            "state": "paused",
            "phase": "short_break",
            "phaseCount": 2,
            "startTime": "2026-02-02T14:30:00Z",
            "workDurationSecs": 1500,
            "breakDurationSecs": 300,
            "longBreakDurationSecs": 900,
            "remainingSecs": 252,
            "elapsedSecs": 48
        }))
        .unwrap();

        assert_eq!(session.phase, Phase::ShortBreak);
        assert_eq!(session.task_id, None);
        assert_eq!(session.to_string(), "#2 short break  paused  04:12 left  p1");
    }

    #[test]
    fn task_display_marks_completion() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "title": "write docs",
            "createdAt": "2026-02-02T14:30:00Z",
            "completed": true
        }))
        .unwrap();
        assert_eq!(task.to_string(), "[x] write docs  t1");
    }
}
