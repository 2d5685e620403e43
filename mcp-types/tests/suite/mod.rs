mod envelope;
mod initialize;
mod progress_notification;
