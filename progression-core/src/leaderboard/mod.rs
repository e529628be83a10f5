//! Leaderboards
//!
//! Ranking is recomputed from ledger entries so it is deterministic:
//! 1. XP (in the window) descending
//! 2. earliest time the student's running sum reached that XP
//! 3. student id ascending

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ledger::{LevelTable, PointsTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderboardWindow {
    AllTime,
    Since(DateTime<Utc>),
}

impl LeaderboardWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        match self {
            LeaderboardWindow::AllTime => true,
            LeaderboardWindow::Since(start) => at >= *start,
        }
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        match self {
            LeaderboardWindow::AllTime => None,
            LeaderboardWindow::Since(start) => Some(*start),
        }
    }
}

/// A student eligible for the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contender {
    pub student_id: String,
    pub name: String,
    /// Lifetime XP, used for the displayed level
    pub total_xp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub student_id: String,
    pub name: String,
    /// XP earned within the window
    pub xp: i64,
    pub level: u32,
    pub reached_at: Option<DateTime<Utc>>,
}

/// Window XP and the time the running sum first reached it.
fn tally(entries: &mut [&PointsTransaction]) -> (i64, Option<DateTime<Utc>>) {
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let total: i64 = entries.iter().map(|t| t.amount).sum();
    if total <= 0 {
        return (total, None);
    }
    let mut running = 0i64;
    for t in entries.iter() {
        running += t.amount;
        if running >= total {
            return (total, Some(t.created_at));
        }
    }
    (total, None)
}

fn compare(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.xp.cmp(&a.xp)
        .then_with(|| match (a.reached_at, b.reached_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.student_id.cmp(&b.student_id))
}

/// Rank `contenders` by XP in `window` computed from `entries`.
/// Entries for students that are not contenders are ignored.
pub fn rank(
    levels: &LevelTable,
    contenders: &[Contender],
    entries: &[PointsTransaction],
    window: LeaderboardWindow,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    let mut by_student: HashMap<&str, Vec<&PointsTransaction>> = HashMap::new();
    for t in entries.iter().filter(|t| window.contains(t.created_at)) {
        by_student.entry(t.student_id.as_str()).or_default().push(t);
    }

    let mut board: Vec<LeaderboardEntry> = contenders
        .iter()
        .map(|c| {
            let (xp, reached_at) = match by_student.get_mut(c.student_id.as_str()) {
                Some(list) => tally(list),
                None => (0, None),
            };
            LeaderboardEntry {
                rank: 0,
                student_id: c.student_id.clone(),
                name: c.name.clone(),
                xp,
                level: levels.level(c.total_xp),
                reached_at,
            }
        })
        .collect();

    board.par_sort_by(compare);
    board.truncate(limit);
    for (i, entry) in board.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    board
}
