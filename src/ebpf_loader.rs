use anyhow::{Context, Result};
use aya::{
    maps::HashMap,
    programs::{
        tc::{self, SchedClassifierLinkId, TcAttachType},
        xdp::XdpLinkId,
        SchedClassifier, Xdp, XdpFlags,
    },
    Bpf,
};
use aya_log::BpfLogger;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info, warn};

use imds_guard_common::policy::{
    BLOCKED_ATTEMPTS_CAPACITY, BLOCKED_ATTEMPTS_MAP, TC_PROGRAM, TOKEN_REQUESTS_CAPACITY,
    TOKEN_REQUESTS_MAP, XDP_PROGRAM,
};

use crate::config::{AttachConfig, Hook, TcDirection, XdpMode};
use crate::errors::GuardError;
use crate::report::{AttemptReport, StoreReport};

enum AttachedLink {
    Xdp(XdpLinkId),
    Tc(SchedClassifierLinkId),
}

/// eBPF program loader and manager
pub struct EbpfLoader {
    ebpf: Bpf,
    interface: String,
    link: Option<AttachedLink>,
}

impl EbpfLoader {
    /// Load the metadata-blocker object from file
    pub fn load(program_path: &Path) -> Result<Self> {
        let ebpf_data = std::fs::read(program_path)
            .with_context(|| format!("Failed to read eBPF program from {:?}", program_path))?;

        let ebpf = Bpf::load(&ebpf_data).context("Failed to load eBPF program")?;

        Ok(Self {
            ebpf,
            interface: String::new(),
            link: None,
        })
    }

    /// Forward aya-log records from the programs into tracing.
    /// Needs a running tokio runtime.
    pub fn init_logging(&mut self) {
        if let Err(e) = BpfLogger::init(&mut self.ebpf) {
            // happens when every log statement was optimised out of the object
            warn!("Failed to initialize eBPF logger: {}", e);
        }
    }

    /// Attach the configured hook to the configured interface
    pub fn attach(&mut self, config: &AttachConfig) -> Result<()> {
        match config.hook {
            Hook::Xdp => self.attach_xdp(&config.interface, config.xdp_mode),
            Hook::Tc => self.attach_tc(&config.interface, config.tc_direction),
        }
    }

    /// Attach the XDP program to a network interface
    pub fn attach_xdp(&mut self, interface: &str, mode: XdpMode) -> Result<()> {
        info!("Attaching XDP program to interface: {} ({:?} mode)", interface, mode);

        let program: &mut Xdp = self
            .ebpf
            .program_mut(XDP_PROGRAM)
            .ok_or_else(|| GuardError::ProgramNotFound(XDP_PROGRAM.to_string()))?
            .try_into()
            .context("Program is not XDP type")?;

        program.load().context("Failed to load XDP program")?;

        let link_id = program
            .attach(interface, xdp_flags(mode))
            .context("Failed to attach XDP program to interface")?;

        self.interface = interface.to_string();
        self.link = Some(AttachedLink::Xdp(link_id));

        info!("XDP program attached successfully to {}", interface);
        Ok(())
    }

    /// Attach the TC classifier to a network interface
    pub fn attach_tc(&mut self, interface: &str, direction: TcDirection) -> Result<()> {
        info!("Attaching TC classifier to interface: {} ({:?})", interface, direction);

        // clsact may already exist on the interface
        if let Err(e) = tc::qdisc_add_clsact(interface) {
            debug!("clsact qdisc not added on {}: {}", interface, e);
        }

        let program: &mut SchedClassifier = self
            .ebpf
            .program_mut(TC_PROGRAM)
            .ok_or_else(|| GuardError::ProgramNotFound(TC_PROGRAM.to_string()))?
            .try_into()
            .context("Program is not a TC classifier")?;

        program.load().context("Failed to load TC program")?;

        let link_id = program
            .attach(interface, tc_attach_type(direction))
            .context("Failed to attach TC program to interface")?;

        self.interface = interface.to_string();
        self.link = Some(AttachedLink::Tc(link_id));

        info!("TC classifier attached successfully to {}", interface);
        Ok(())
    }

    /// Detach whichever program is attached
    pub fn detach(&mut self) -> Result<()> {
        let link = match self.link.take() {
            Some(link) => link,
            None => return Ok(()),
        };

        match link {
            AttachedLink::Xdp(link_id) => {
                let program: &mut Xdp = self
                    .ebpf
                    .program_mut(XDP_PROGRAM)
                    .ok_or_else(|| GuardError::ProgramNotFound(XDP_PROGRAM.to_string()))?
                    .try_into()
                    .context("Program is not XDP type")?;
                program.detach(link_id)?;
            }
            AttachedLink::Tc(link_id) => {
                let program: &mut SchedClassifier = self
                    .ebpf
                    .program_mut(TC_PROGRAM)
                    .ok_or_else(|| GuardError::ProgramNotFound(TC_PROGRAM.to_string()))?
                    .try_into()
                    .context("Program is not a TC classifier")?;
                program.detach(link_id)?;
            }
        }

        info!("Metadata blocker detached from {}", self.interface);
        Ok(())
    }

    /// Read one of the per-source counter maps. Never writes to the map.
    fn read_counts(&self, name: &str, capacity: u32) -> Result<StoreReport> {
        let map: HashMap<_, u32, u64> = HashMap::try_from(
            self.ebpf
                .map(name)
                .ok_or_else(|| GuardError::MapNotFound(name.to_string()))?,
        )?;

        let mut entries = Vec::new();
        for item in map.iter() {
            match item {
                Ok((source, count)) => entries.push((Ipv4Addr::from(source), count)),
                // entries can vanish between key iteration and lookup
                Err(e) => debug!("Skipping {} entry: {}", name, e),
            }
        }

        Ok(StoreReport::new(
            &name.to_lowercase(),
            capacity as usize,
            entries,
        ))
    }

    pub fn blocked_attempts(&self) -> Result<StoreReport> {
        self.read_counts(BLOCKED_ATTEMPTS_MAP, BLOCKED_ATTEMPTS_CAPACITY)
    }

    pub fn token_requests(&self) -> Result<StoreReport> {
        self.read_counts(TOKEN_REQUESTS_MAP, TOKEN_REQUESTS_CAPACITY)
    }

    /// Snapshot of both counter maps
    pub fn report(&self) -> Result<AttemptReport> {
        Ok(AttemptReport::new(
            self.blocked_attempts()?,
            self.token_requests()?,
        ))
    }

    /// Check if attached to an interface
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Get attached interface name
    pub fn interface(&self) -> Option<&str> {
        if self.is_attached() {
            Some(&self.interface)
        } else {
            None
        }
    }
}

impl Drop for EbpfLoader {
    fn drop(&mut self) {
        if self.is_attached() {
            if let Err(e) = self.detach() {
                warn!("Failed to detach metadata blocker on drop: {}", e);
            }
        }
    }
}

fn xdp_flags(mode: XdpMode) -> XdpFlags {
    match mode {
        XdpMode::Skb => XdpFlags::SKB_MODE,
        XdpMode::Driver => XdpFlags::DRV_MODE,
        XdpMode::Hardware => XdpFlags::HW_MODE,
    }
}

fn tc_attach_type(direction: TcDirection) -> TcAttachType {
    match direction {
        TcDirection::Ingress => TcAttachType::Ingress,
        TcDirection::Egress => TcAttachType::Egress,
    }
}
