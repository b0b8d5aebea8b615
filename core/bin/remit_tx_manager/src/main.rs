// Built-in deps
use std::cell::RefCell;
// External uses
use futures::channel::mpsc;
use futures::SinkExt;
// Workspace uses
use remit_config::{ConfigurationOptions, TxManagerOptions};
use remit_storage::ConnectionPool;
use remit_tx_manager::{run_tx_manager, wait_for_stop_signal, wait_for_tasks};
// Local uses

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vlog::init();

    let config = ConfigurationOptions::from_env();
    let options = TxManagerOptions::from_env();
    let connection_pool = ConnectionPool::new(None).await;

    // Handle ctrl+c
    let (stop_signal_sender, stop_signal_receiver) = mpsc::channel(256);
    {
        let stop_signal_sender = RefCell::new(stop_signal_sender.clone());
        ctrlc::set_handler(move || {
            let mut sender = stop_signal_sender.borrow_mut();
            futures::executor::block_on(sender.send(true)).expect("ctrlc signal send");
        })
        .expect("Error setting Ctrl-C handler");
    }

    log::info!("Starting the transaction queue manager");
    let task_handle = run_tx_manager(connection_pool, &config, &options)?;

    tokio::select! {
        _ = async { wait_for_tasks(vec![task_handle]).await } => {
            // We don't need to do anything here, since the actor will panic upon future cancelling.
        },
        _ = async { wait_for_stop_signal(stop_signal_receiver).await } => {},
    };

    Ok(())
}
