//! Representation of a unit of work executed by a VM.

use std::fmt::{Display, Formatter};

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use greendc_core::EPSILON;

use crate::core::utilization_model::UtilizationModel;

/// Status of cloudlet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Created,
    Ready,
    Queued,
    InExec,
    Paused,
    Success,
    Failed,
    Canceled,
}

impl Display for CloudletStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CloudletStatus::Created => write!(f, "created"),
            CloudletStatus::Ready => write!(f, "ready"),
            CloudletStatus::Queued => write!(f, "queued"),
            CloudletStatus::InExec => write!(f, "in_exec"),
            CloudletStatus::Paused => write!(f, "paused"),
            CloudletStatus::Success => write!(f, "success"),
            CloudletStatus::Failed => write!(f, "failed"),
            CloudletStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A unit of work with a length in million instructions (MI) and a CPU utilization model.
///
/// A cloudlet is owned by its broker until submission, then by the cloudlet scheduler of the
/// assigned VM, and is finally returned to the broker upon completion.
#[derive(Clone)]
pub struct Cloudlet {
    pub id: u32,
    owner_id: u32,
    length: f64,
    pe_count: u32,
    file_size: f64,
    output_size: f64,
    utilization_model: Box<dyn UtilizationModel>,
    status: CloudletStatus,
    vm_id: Option<u32>,
    submission_time: f64,
    exec_start_time: f64,
    finish_time: f64,
    finished_so_far: f64,
}

impl Serialize for Cloudlet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Cloudlet", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("length", &self.length)?;
        state.serialize_field("status", &self.status)?;
        state.end()
    }
}

impl Cloudlet {
    /// Creates cloudlet with specified parameters.
    ///
    /// * `length` - processing demand in MI per PE.
    pub fn new(
        id: u32,
        owner_id: u32,
        length: f64,
        pe_count: u32,
        file_size: f64,
        output_size: f64,
        utilization_model: Box<dyn UtilizationModel>,
    ) -> Self {
        Self {
            id,
            owner_id,
            length,
            pe_count,
            file_size,
            output_size,
            utilization_model,
            status: CloudletStatus::Created,
            vm_id: None,
            submission_time: -1.,
            exec_start_time: -1.,
            finish_time: -1.,
            finished_so_far: 0.,
        }
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    pub fn pe_count(&self) -> u32 {
        self.pe_count
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn file_size(&self) -> f64 {
        self.file_size
    }

    pub fn output_size(&self) -> f64 {
        self.output_size
    }

    /// Total processing demand over all PEs in MI.
    pub fn total_length(&self) -> f64 {
        self.length * self.pe_count as f64
    }

    /// Remaining processing demand in MI.
    pub fn remaining_work(&self) -> f64 {
        (self.total_length() - self.finished_so_far).max(0.)
    }

    pub fn is_finished(&self) -> bool {
        self.remaining_work() < EPSILON
    }

    /// Accounts the given amount of processed work in MI.
    pub fn advance(&mut self, work: f64) {
        self.finished_so_far = (self.finished_so_far + work).min(self.total_length());
    }

    /// Returns the CPU demand fraction at the given time according to the utilization model.
    pub fn utilization_of_cpu(&self, time: f64) -> f64 {
        self.utilization_model.utilization(time)
    }

    pub fn status(&self) -> CloudletStatus {
        self.status
    }

    pub fn set_status(&mut self, status: CloudletStatus) {
        self.status = status;
    }

    pub fn vm_id(&self) -> Option<u32> {
        self.vm_id
    }

    pub fn set_vm_id(&mut self, vm_id: u32) {
        self.vm_id = Some(vm_id);
    }

    pub fn submission_time(&self) -> f64 {
        self.submission_time
    }

    pub fn set_submission_time(&mut self, time: f64) {
        self.submission_time = time;
    }

    pub fn exec_start_time(&self) -> f64 {
        self.exec_start_time
    }

    pub fn set_exec_start_time(&mut self, time: f64) {
        self.exec_start_time = time;
    }

    pub fn finish_time(&self) -> f64 {
        self.finish_time
    }

    /// Marks the cloudlet as successfully completed at the given time.
    pub fn finish(&mut self, time: f64) {
        self.finished_so_far = self.total_length();
        self.finish_time = time;
        self.status = CloudletStatus::Success;
    }
}
