//! One-epoch train and validate loops
//!
//! Both loops follow the same shape: walk the batch stream, reduce the
//! per-batch loss and precision across ranks so every worker tracks global
//! averages, and let the chief print progress lines and record scalars.
//! Gradients are averaged by dividing the local loss by the world size and
//! summing gradients across ranks.

use std::time::Instant;

use crate::data::BatchLoader;
use crate::dist::Collective;
use crate::metrics::{topk_accuracy, AverageMeter};
use crate::models::{flatten_grads, load_grads, Network};
use crate::nn::CrossEntropyLoss;
use crate::optim::{Optimizer, Sgd};

use super::scalars::ScalarWriter;
use super::Schedule;

pub(crate) struct TrainEpoch<'a> {
    pub net: &'a mut dyn Network,
    pub criterion: &'a CrossEntropyLoss,
    pub optimizer: &'a mut Sgd,
    pub schedule: &'a mut Schedule,
    pub collective: &'a mut Collective,
    pub writer: Option<&'a mut ScalarWriter>,
    pub epoch: usize,
    pub niters: usize,
    pub print_freq: usize,
}

impl TrainEpoch<'_> {
    /// Run one training epoch over `loader`.
    pub fn run(mut self, loader: BatchLoader) -> crate::Result<()> {
        let mut batch_time = AverageMeter::new();
        let mut data_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut top1 = AverageMeter::new();
        let mut top5 = AverageMeter::new();

        let world = self.collective.world_size() as f32;
        let distributed = self.collective.world_size() > 1;
        let chief = self.collective.is_chief();
        let mut grads: Vec<f32> = Vec::new();

        let mut end = Instant::now();
        for (i, batch) in loader.enumerate() {
            let batch = batch?;
            data_time.update(end.elapsed().as_secs_f32(), 1);

            self.optimizer.set_lr(self.schedule.get_lr());

            let logits = self.net.forward(&batch.images, true);
            let (raw_loss, mut dlogits) = self.criterion.forward(&logits, &batch.labels);
            let loss = raw_loss / world;
            dlogits /= world;

            let precs = topk_accuracy(&logits, &batch.labels, &[1, 5]);
            let mut reduced = [loss, precs[0] / world, precs[1] / world];
            self.collective.all_reduce_sum(&mut reduced)?;
            losses.update(reduced[0], batch.len());
            top1.update(reduced[1], batch.len());
            top5.update(reduced[2], batch.len());

            self.optimizer.zero_grad(self.net);
            self.net.backward(&dlogits);
            if distributed {
                flatten_grads(self.net, &mut grads);
                self.collective.all_reduce_sum(&mut grads)?;
                load_grads(self.net, &grads);
            }
            self.optimizer.step(self.net);
            self.schedule.step();

            batch_time.update(end.elapsed().as_secs_f32(), 1);
            end = Instant::now();

            if i % self.print_freq == 0 && chief {
                println!(
                    "Epoch: [{}][{}/{}]\t\
                     Time {:.3} ({:.3})\t\
                     Data {:.3} ({:.3})\t\
                     Loss {:.4} ({:.4})\t\
                     Prec@1 {:.3} ({:.3})\t\
                     Prec@5 {:.3} ({:.3})",
                    self.epoch,
                    i,
                    self.niters,
                    batch_time.val,
                    batch_time.avg,
                    data_time.val,
                    data_time.avg,
                    losses.val,
                    losses.avg,
                    top1.val,
                    top1.avg,
                    top5.val,
                    top5.avg,
                );
                if let Some(writer) = self.writer.as_deref_mut() {
                    let niter = self.epoch * self.niters + i;
                    writer.add_scalar("learning_rate", self.optimizer.lr(), niter)?;
                    writer.add_scalar("Train/Avg_Loss", losses.avg, niter)?;
                    writer.add_scalar("Train/Avg_Top1", top1.avg / 100.0, niter)?;
                    writer.add_scalar("Train/Avg_Top5", top5.avg / 100.0, niter)?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) struct ValidateEpoch<'a> {
    pub net: &'a mut dyn Network,
    pub criterion: &'a CrossEntropyLoss,
    pub collective: &'a mut Collective,
    pub writer: Option<&'a mut ScalarWriter>,
    pub epoch: usize,
    pub niters: usize,
    pub print_freq: usize,
}

impl ValidateEpoch<'_> {
    /// Run validation over `loader`; returns the global top-1 average.
    pub fn run(mut self, loader: BatchLoader) -> crate::Result<f32> {
        let mut batch_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut top1 = AverageMeter::new();
        let mut top5 = AverageMeter::new();

        let world = self.collective.world_size() as f32;
        let chief = self.collective.is_chief();

        let mut end = Instant::now();
        for (i, batch) in loader.enumerate() {
            let batch = batch?;

            let logits = self.net.forward(&batch.images, false);
            let (raw_loss, _) = self.criterion.forward(&logits, &batch.labels);
            let loss = raw_loss / world;

            let precs = topk_accuracy(&logits, &batch.labels, &[1, 5]);
            let mut reduced = [loss, precs[0] / world, precs[1] / world];
            self.collective.all_reduce_sum(&mut reduced)?;
            losses.update(reduced[0], batch.len());
            top1.update(reduced[1], batch.len());
            top5.update(reduced[2], batch.len());

            batch_time.update(end.elapsed().as_secs_f32(), 1);
            end = Instant::now();

            if i % self.print_freq == 0 && chief {
                println!(
                    "Test: [{}/{}]\t\
                     Time {:.3} ({:.3})\t\
                     Loss {:.4} ({:.4})\t\
                     Prec@1 {:.3} ({:.3})\t\
                     Prec@5 {:.3} ({:.3})",
                    i,
                    self.niters,
                    batch_time.val,
                    batch_time.avg,
                    losses.val,
                    losses.avg,
                    top1.val,
                    top1.avg,
                    top5.val,
                    top5.avg,
                );
            }
        }

        if chief {
            println!(
                " * Prec@1 {:.3} Prec@5 {:.3} Loss {:.4}",
                top1.avg, top5.avg, losses.avg
            );
            if let Some(writer) = self.writer.as_deref_mut() {
                let niter = self.epoch + 1;
                writer.add_scalar("Eval/Avg_Loss", losses.avg, niter)?;
                writer.add_scalar("Eval/Avg_Top1", top1.avg / 100.0, niter)?;
                writer.add_scalar("Eval/Avg_Top5", top5.avg / 100.0, niter)?;
            }
        }
        Ok(top1.avg)
    }
}
