// Data models for frames, pose keypoints, extracted tracks, and exercises

pub mod exercise;
pub mod frame;
pub mod pose;
pub mod track;
