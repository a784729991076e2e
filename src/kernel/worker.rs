//! Single sequential worker owning an [`ExecutionKernel`].
//!
//! Every request is queued on one channel and handled end to end before the
//! next, so namespace access needs no locking and executions observe arrival
//! order.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{ExecutionKernel, ExecutionResult, KernelError, VariableDescriptor, VariableValue};

/// Stack for the worker thread; deep user recursion runs on it.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

const QUEUE_DEPTH: usize = 100;

enum KernelCommand {
    Execute {
        code: String,
        reply: oneshot::Sender<ExecutionResult>,
    },
    ListVars {
        reply: oneshot::Sender<Vec<VariableDescriptor>>,
    },
    GetVar {
        name: String,
        reply: oneshot::Sender<Result<VariableValue, KernelError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the kernel worker thread.
///
/// The worker exits once every handle is dropped.
#[derive(Clone)]
pub struct KernelHandle {
    cmd_tx: mpsc::Sender<KernelCommand>,
}

impl KernelHandle {
    pub fn spawn() -> anyhow::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("kernel-worker".into())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || run_worker(cmd_rx))?;
        Ok(Self { cmd_tx })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> KernelCommand,
    ) -> Result<T, KernelError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| KernelError::Unavailable)?;
        reply_rx.await.map_err(|_| KernelError::Unavailable)
    }

    pub async fn execute(&self, code: String) -> Result<ExecutionResult, KernelError> {
        self.request(|reply| KernelCommand::Execute { code, reply })
            .await
    }

    pub async fn list_vars(&self) -> Result<Vec<VariableDescriptor>, KernelError> {
        self.request(|reply| KernelCommand::ListVars { reply }).await
    }

    pub async fn get_var(&self, name: String) -> Result<VariableValue, KernelError> {
        self.request(|reply| KernelCommand::GetVar { name, reply })
            .await?
    }

    pub async fn reset(&self) -> Result<(), KernelError> {
        self.request(|reply| KernelCommand::Reset { reply }).await
    }

    /// A handle whose worker is already gone.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (cmd_tx, _) = mpsc::channel(1);
        Self { cmd_tx }
    }
}

fn run_worker(mut cmd_rx: mpsc::Receiver<KernelCommand>) {
    info!("Kernel worker started");
    let mut kernel = ExecutionKernel::new();
    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            KernelCommand::Execute { code, reply } => {
                debug!(bytes = code.len(), "execute");
                let _ = reply.send(kernel.execute(&code));
            }
            KernelCommand::ListVars { reply } => {
                let _ = reply.send(kernel.list_vars());
            }
            KernelCommand::GetVar { name, reply } => {
                let _ = reply.send(kernel.get_var(&name));
            }
            KernelCommand::Reset { reply } => {
                kernel.reset();
                let _ = reply.send(());
            }
        }
    }
    info!("Kernel worker stopped");
}
