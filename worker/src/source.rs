use machine_learning::{
    Result,
    dataset::{AudioBatch, AudioPipeline},
};

/// The input of the training loop.
#[allow(unused)]
#[trait_variant::make(BatchSource: Send)]
pub trait LocalBatchSource {
    /// Waits for the next batch of `batch_size` segments.
    async fn next_batch(&mut self, batch_size: usize) -> Result<AudioBatch>;

    /// Stops producing batches and releases the producers, blocking until they exit.
    fn stop(&mut self) -> Result<()>;
}

impl BatchSource for AudioPipeline {
    async fn next_batch(&mut self, batch_size: usize) -> Result<AudioBatch> {
        self.dequeue(batch_size).await
    }

    fn stop(&mut self) -> Result<()> {
        AudioPipeline::stop(self)
    }
}
