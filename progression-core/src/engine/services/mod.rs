mod achievement;
mod challenge;
mod graduation;
mod insight;
mod training;
mod xp;

pub use achievement::AchievementService;
pub use challenge::{
    ChallengeLeaderboardEntry, ChallengeOutcome, ChallengeService, StudentChallenge,
    SubmissionReview,
};
pub use graduation::{DegreeOutcome, GraduationApproval, GraduationService};
pub use insight::{InsightService, StudentProfile};
pub use training::{
    CheckInOutcome, EvaluationInput, EvaluationOutcome, PracticeOutcome, TrainingService,
};
pub use xp::XpService;
