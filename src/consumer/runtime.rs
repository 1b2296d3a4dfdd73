//! Supervised run loop around a consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::consumer::Consumer;
use crate::error::{KafkaError, KafkaResult};
use crate::message::Message;
use crate::util::Timeout;

/// Application hooks driven by a [`ConsumerRunner`].
pub trait MessageHandler {
    /// Called once before the first message is fetched.
    fn initialize(&mut self) {}

    /// Called for every fetched message. Returning an error stops the run
    /// loop; the error is wrapped together with the message into
    /// [`KafkaError::ProcessMessage`] and surfaced to the caller.
    fn process(&mut self, message: &Message) -> Result<(), String>;

    /// Called once after the consumer has been closed and its offsets
    /// committed, on every exit path of a run whose `initialize` ran.
    fn dispose(&mut self) {}
}

/// Cloneable handle used to stop a running [`ConsumerRunner`] from another
/// thread. Termination is cooperative: the flag is observed at the next
/// loop iteration boundary.
#[derive(Clone)]
pub struct RunnerHandle {
    flag: Arc<AtomicBool>,
}

impl RunnerHandle {
    /// Requests termination. Safe to call from any thread, any number of
    /// times.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reports whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Long running consumption loop: `initialize`, then fetch and `process`
/// until terminated or a fatal error occurs, then close the consumer and
/// `dispose`.
pub struct ConsumerRunner<H: MessageHandler> {
    handler: H,
    flag: Arc<AtomicBool>,
}

impl<H: MessageHandler> ConsumerRunner<H> {
    /// Creates a runner around the given handler.
    pub fn new(handler: H) -> ConsumerRunner<H> {
        ConsumerRunner {
            handler,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle that can terminate the run loop from another
    /// thread.
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            flag: Arc::clone(&self.flag),
        }
    }

    /// Requests termination from the current thread.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Consumes the handler back out of the runner.
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Drives the consumer until terminated or failed.
    ///
    /// Each fetch attempt blocks up to the consumer's configured iteration
    /// timeout, which bounds the latency of observing the termination flag.
    /// A failing `process` hook stops the loop with a
    /// [`KafkaError::ProcessMessage`] carrying the triggering message; the
    /// consumer is still closed and `dispose` still runs.
    pub fn run<C: Consumer>(&mut self, consumer: &mut C) -> KafkaResult<()> {
        self.handler.initialize();
        debug!("consumer runner initialized");
        let run_result = self.run_loop(consumer);
        let close_result = consumer.close();
        self.handler.dispose();
        debug!("consumer runner disposed");
        run_result.and(close_result)
    }

    fn run_loop<C: Consumer>(&mut self, consumer: &mut C) -> KafkaResult<()> {
        let poll_timeout = consumer.iter_timeout();
        loop {
            if self.flag.load(Ordering::SeqCst) {
                info!("termination requested, stopping consumer runner");
                return Ok(());
            }
            match consumer.poll(Timeout::After(poll_timeout))? {
                Some(message) => {
                    if let Err(cause) = self.handler.process(&message) {
                        return Err(KafkaError::ProcessMessage {
                            cause,
                            message: Box::new(message),
                        });
                    }
                }
                None => {}
            }
        }
    }
}
