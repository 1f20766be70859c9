pub mod mail_queue;
