mod dispatch;
mod lifecycle;
mod orchestration;
mod resume;
