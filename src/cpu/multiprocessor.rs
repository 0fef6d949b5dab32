//! A multiprocessor: the worker pool of one last-level-cache group.

use crate::cpu::command::{ExecKind, WorkerCommand};
use crate::cpu::worker::Worker;
use crate::hw;

pub(crate) struct Multiprocessor {
    workers: Vec<Worker>,
}

impl Multiprocessor {
    pub fn new(group: &hw::CacheGroup) -> Multiprocessor {
        let workers = group.cpus.iter().map(|cpu| Worker::spawn(cpu, group)).collect();

        Multiprocessor { workers }
    }

    /// Dispatches a command to one of the pool's workers.
    ///
    /// ND-range blocks go to the least-loaded worker. Plain copies,
    /// native calls and service commands take the first worker; selection
    /// there is a policy slot and any worker is correct.
    pub fn submit(&self, cmd: WorkerCommand) -> Result<(), WorkerCommand> {
        let worker = match &cmd {
            WorkerCommand::Exec(exec) if matches!(exec.kind, ExecKind::NDRangeBlock(_)) => {
                self.least_loaded_worker()
            }
            _ => &self.workers[0],
        };

        worker.submit(cmd)
    }

    fn least_loaded_worker(&self) -> &Worker {
        let mut min_load = usize::MAX;
        let mut chosen = &self.workers[0];

        for worker in &self.workers {
            let load = worker.load_indicator();
            if load < min_load {
                min_load = load;
                chosen = worker;
            }
        }

        chosen
    }
}
