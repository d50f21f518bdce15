//! The request pipeline, one module per stage.

pub mod basket_status;
pub mod command_processor;
pub mod controller;
pub mod receiver;
pub mod replication;
pub mod response_sender;
pub mod statistics;

pub use basket_status::BasketStatusResolver;
pub use command_processor::CommandProcessor;
pub use controller::StorageController;
pub use receiver::{TcpCommandReceiver, run_tcp_acceptor, run_udp_receiver};
pub use replication::ReplicationNotifier;
pub use response_sender::ResponseSender;
pub use statistics::{format_statistics, run_statistics_logger};
