//! Standard simulation events.

// VM ALLOCATION EVENTS ////////////////////////////////////////////////////////////////////////////

pub mod allocation {
    use serde::Serialize;

    #[derive(Serialize, Clone)]
    pub struct VmCreateRequest {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmCreateAck {
        pub vm_id: u32,
        pub host_id: Option<u32>,
        pub created: bool,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDestroyRequest {
        pub vm_id: u32,
    }

    /// Delivered to the datacenter when the live migration of a VM completes,
    /// i.e. after the delay modeling the memory transfer over the target host network.
    #[derive(Serialize, Clone)]
    pub struct VmMigrate {
        pub vm_id: u32,
        pub target_host: u32,
    }
}

// CLOUDLET EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod cloudlet {
    use serde::Serialize;

    use crate::core::cloudlet::Cloudlet;

    /// Transfers the ownership of a cloudlet from the broker to the datacenter.
    #[derive(Serialize, Clone)]
    pub struct CloudletSubmit {
        pub cloudlet: Cloudlet,
    }

    /// Returns the completed cloudlet back to its owner.
    #[derive(Serialize, Clone)]
    pub struct CloudletReturn {
        pub cloudlet: Cloudlet,
    }
}

// DATACENTER EVENTS ///////////////////////////////////////////////////////////////////////////////

pub mod datacenter {
    use serde::Serialize;

    /// Periodic datacenter processing tick.
    #[derive(Serialize, Clone)]
    pub struct ProcessDatacenterEvents {}
}
