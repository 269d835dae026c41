use crate::consts::{RDM_DISCOVERY_ATTEMPTS, RDM_DISCOVERY_STACK_SIZE, RDM_MAX_UID, RDM_QUICK_FIND_ROUNDS};
use crate::dmx_controller::{DmxController, RdmResponseError};
use crate::dmx_driver::{DiscoveryOption, DmxError, RdmControllerDriver};
use crate::rdm_types::DiscoveryMuteResponse;
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

#[derive(Debug, Copy, Clone)]
pub struct DiscoveryConfig {
    /// Mute the device that answered a branch and probe the branch again before splitting it.
    /// Disable it to verify that the binary search alone finds every device.
    pub quick_find: bool,
    /// Retry a single unanswered DISC_MUTE with the byte swapped uid.
    pub swap_fallback: bool,
    /// How often DISC_UNIQUE_BRANCH and DISC_MUTE are sent before giving up on an answer.
    pub attempts: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            quick_find: true,
            swap_fallback: true,
            attempts: RDM_DISCOVERY_ATTEMPTS,
        }
    }
}

/// An unresolved range of the uid space. `lower_bound <= upper_bound` always holds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryBranch {
    pub lower_bound: u64,
    pub upper_bound: u64,
}

impl DiscoveryBranch {
    pub fn full_range() -> Self {
        Self {
            lower_bound: 0,
            upper_bound: RDM_MAX_UID,
        }
    }

    /// A branch with a single candidate uid.
    pub fn is_leaf(&self) -> bool {
        self.lower_bound == self.upper_bound
    }

    /// Splits the branch at its midpoint into its lower and upper half.
    pub fn split(&self) -> Option<(Self, Self)> {
        if self.is_leaf() {
            return None;
        }

        let mid = (self.lower_bound + self.upper_bound) / 2;

        Some((
            Self {
                lower_bound: self.lower_bound,
                upper_bound: mid,
            },
            Self {
                lower_bound: mid + 1,
                upper_bound: self.upper_bound,
            },
        ))
    }
}

/// Depth first stack of branches. The lower half of a split is popped before the upper half, so
/// at most one pending sibling per level is stored and 49 entries cover the 48 bit uid space.
pub struct DiscoveryStack {
    branches: heapless::Vec<DiscoveryBranch, RDM_DISCOVERY_STACK_SIZE>,
}

impl DiscoveryStack {
    /// Creates a stack holding the whole uid space.
    pub fn full_range() -> Self {
        let mut branches = heapless::Vec::new();
        // capacity is never zero
        let _ = branches.push(DiscoveryBranch::full_range());

        Self { branches }
    }

    pub fn pop(&mut self) -> Option<DiscoveryBranch> {
        self.branches.pop()
    }

    /// Pushes both halves of `branch`. Returns false if the branch is a leaf or the stack is full.
    pub fn push_split(&mut self, branch: &DiscoveryBranch) -> bool {
        let Some((lower, upper)) = branch.split() else {
            return false;
        };

        if self.branches.capacity() - self.branches.len() < 2 {
            return false;
        }

        // cannot fail, two free entries were checked above
        let _ = self.branches.push(upper);
        let _ = self.branches.push(lower);

        true
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

fn discover_branch<D: RdmControllerDriver>(
    controller: &mut DmxController<D>,
    attempts: u8,
    branch: &DiscoveryBranch,
) -> Result<DiscoveryOption, RdmResponseError<D::DriverError>> {
    for _ in 0..attempts.max(1) {
        match controller.rdm_discover(branch.lower_bound, branch.upper_bound)? {
            DiscoveryOption::NoDevice => continue,
            discovery_option => return Ok(discovery_option),
        }
    }

    Ok(DiscoveryOption::NoDevice)
}

/// Sends DISC_MUTE until the device answers. Only errors of the driver itself are returned,
/// everything else counts as a missing answer.
fn mute_device<D: RdmControllerDriver>(
    controller: &mut DmxController<D>,
    attempts: u8,
    uid: UniqueIdentifier,
) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
    for _ in 0..attempts.max(1) {
        match controller.rdm_disc_mute(PackageAddress::Device(uid)) {
            Ok(Some(mute_response)) => return Ok(Some(mute_response)),
            Ok(None) => return Ok(None),
            Err(error @ RdmResponseError::DmxError(DmxError::DriverError(_))) => return Err(error),
            Err(_) => trace!("no mute response from {}", uid),
        }
    }

    Ok(None)
}

fn mute_leaf<D: RdmControllerDriver>(
    controller: &mut DmxController<D>,
    config: &DiscoveryConfig,
    uid: u64,
) -> Result<Option<UniqueIdentifier>, RdmResponseError<D::DriverError>> {
    let Ok(uid) = UniqueIdentifier::try_from(uid) else {
        return Ok(None);
    };

    if let Some(mute_response) = mute_device(controller, config.attempts, uid)? {
        return Ok(Some(mute_response.binding_uid.unwrap_or(uid)));
    }

    if !config.swap_fallback {
        return Ok(None);
    }

    // some responders answer to their byte swapped uid only
    let Some(swapped) = uid.swap_bytes() else {
        return Ok(None);
    };

    Ok(mute_device(controller, 1, swapped)?
        .map(|mute_response| mute_response.binding_uid.unwrap_or(swapped)))
}

/// Blocking binary tree discovery.
///
/// Unmutes all responders with a DISC_UN_MUTE broadcast, then searches the whole uid space and
/// mutes every device it finds. `on_found` is called once per device in the order they were found.
/// Devices reporting a binding uid in their mute response are reported with the binding uid.
///
/// Returns the amount of devices found.
pub fn run_full_discovery<D: RdmControllerDriver>(
    controller: &mut DmxController<D>,
    config: &DiscoveryConfig,
    mut on_found: impl FnMut(UniqueIdentifier),
) -> Result<usize, RdmResponseError<D::DriverError>> {
    controller.rdm_disc_un_mute(PackageAddress::Broadcast)?;

    let mut stack = DiscoveryStack::full_range();
    let mut found = 0;

    while let Some(branch) = stack.pop() {
        if branch.is_leaf() {
            if let Some(uid) = mute_leaf(controller, config, branch.lower_bound)? {
                debug!("found rdm device {}", uid);
                on_found(uid);
                found += 1;
            }

            continue;
        }

        let mut discovery_option = discover_branch(controller, config.attempts, &branch)?;
        if discovery_option == DiscoveryOption::NoDevice {
            continue;
        }

        if config.quick_find {
            for _ in 0..RDM_QUICK_FIND_ROUNDS {
                let DiscoveryOption::Found(uid) = discovery_option else {
                    break;
                };

                if let Some(mute_response) = mute_device(controller, config.attempts, uid)? {
                    let uid = mute_response.binding_uid.unwrap_or(uid);
                    debug!("found rdm device {}", uid);
                    on_found(uid);
                    found += 1;
                }

                discovery_option = discover_branch(controller, config.attempts, &branch)?;
            }

            if discovery_option == DiscoveryOption::NoDevice {
                continue;
            }
        }

        if !stack.push_split(&branch) {
            warn!(
                "discovery stack is full, skipping {:#x}..{:#x}",
                branch.lower_bound,
                branch.upper_bound
            );
        }
    }

    Ok(found)
}

/// Runs [run_full_discovery] and stores the found uids in `uids`.
///
/// Returns the amount of devices found. If it is bigger than the length of `uids` the uids that
/// did not fit are lost, run the discovery again with more space.
pub fn discover_devices<D: RdmControllerDriver>(
    controller: &mut DmxController<D>,
    config: &DiscoveryConfig,
    uids: &mut [UniqueIdentifier],
) -> Result<usize, RdmResponseError<D::DriverError>> {
    let mut index = 0;

    run_full_discovery(controller, config, |uid| {
        if let Some(slot) = uids.get_mut(index) {
            *slot = uid;
        }
        index += 1;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx_controller::DmxControllerConfig;
    use crate::dmx_driver::ControllerDriverErrorDef;
    use crate::pids;
    use crate::port::{DmxConfig, DmxPort};
    use crate::rdm_data::{
        deserialize_disc_unique_branch, is_disc_unique_branch, RdmRequestData, RdmResponseData,
    };
    use crate::rdm_responder::RdmResponderConfig;
    use crate::sim::{rdm_devices, Wire};
    use crate::types::ResponseType;

    struct Device {
        uid: UniqueIdentifier,
        muted: bool,
        /// Compares the discovery bounds against its byte swapped uid.
        swapped_range: bool,
        /// Mute requests that are ignored before the device answers.
        ignored_mutes: u8,
        binding_uid: Option<UniqueIdentifier>,
    }

    impl Device {
        fn new(uid: UniqueIdentifier) -> Self {
            Self {
                uid,
                muted: false,
                swapped_range: false,
                ignored_mutes: 0,
                binding_uid: None,
            }
        }

        fn range_key(&self) -> u64 {
            let uid = if self.swapped_range {
                self.uid.swap_bytes().unwrap()
            } else {
                self.uid
            };

            u64::from(uid)
        }
    }

    struct Population {
        devices: Vec<Device>,
        branches: Vec<(u64, u64)>,
    }

    impl ControllerDriverErrorDef for Population {
        type DriverError = ();
    }

    impl RdmControllerDriver for Population {
        fn rdm_request(
            &mut self,
            request: RdmRequestData,
        ) -> Result<Option<RdmResponseData>, DmxError<()>> {
            match (request.parameter_id, request.destination_uid) {
                (pids::DISC_UN_MUTE, PackageAddress::Broadcast) => {
                    self.devices.iter_mut().for_each(|device| device.muted = false);
                    Ok(None)
                },
                (pids::DISC_MUTE, PackageAddress::Device(uid)) => {
                    let Some(device) = self.devices.iter_mut().find(|device| device.uid == uid)
                    else {
                        return Err(DmxError::TimeoutError);
                    };

                    if device.ignored_mutes > 0 {
                        device.ignored_mutes -= 1;
                        return Err(DmxError::TimeoutError);
                    }

                    device.muted = true;
                    let mute_response = DiscoveryMuteResponse {
                        binding_uid: device.binding_uid,
                        ..Default::default()
                    };

                    Ok(Some(
                        request
                            .build_response(
                                device.uid,
                                ResponseType::ResponseTypeAck,
                                mute_response.serialize(),
                                0,
                            )
                            .unwrap(),
                    ))
                },
                _ => panic!("unexpected request {:?}", request),
            }
        }

        fn rdm_discover_branch(
            &mut self,
            request: RdmRequestData,
        ) -> Result<DiscoveryOption, DmxError<()>> {
            let (lower_bound, upper_bound) =
                deserialize_disc_unique_branch(&request.parameter_data).unwrap();
            assert!(lower_bound <= upper_bound);
            self.branches.push((lower_bound, upper_bound));

            let mut answering = self.devices.iter().filter(|device| {
                !device.muted && (lower_bound..=upper_bound).contains(&device.range_key())
            });

            Ok(match (answering.next(), answering.next()) {
                (None, _) => DiscoveryOption::NoDevice,
                (Some(device), None) => DiscoveryOption::Found(device.uid),
                _ => DiscoveryOption::Collision,
            })
        }
    }

    fn uid(manufacturer_uid: u16, device_uid: u32) -> UniqueIdentifier {
        UniqueIdentifier::new(manufacturer_uid, device_uid).unwrap()
    }

    fn controller(devices: Vec<Device>) -> DmxController<Population> {
        DmxController::new(
            Population {
                devices,
                branches: Vec::new(),
            },
            &DmxControllerConfig::default(),
        )
    }

    fn discover(
        controller: &mut DmxController<Population>,
        config: &DiscoveryConfig,
    ) -> Vec<UniqueIdentifier> {
        let mut found = Vec::new();
        let count = run_full_discovery(controller, config, |uid| found.push(uid)).unwrap();
        assert_eq!(count, found.len());
        found
    }

    fn scattered_uids() -> Vec<UniqueIdentifier> {
        vec![
            uid(0x0000, 0x0000_0001),
            uid(0x05E0, 0x0000_0A0B),
            uid(0x05E0, 0x0000_0A0C),
            uid(0x05E0, 0x1000_0A0B),
            uid(0x05E1, 0x0000_0A0B),
            uid(0x7FF0, 0x8000_0000),
            uid(0xFFFE, 0xFFFF_FFFE),
        ]
    }

    #[test]
    fn test_branch_split() {
        let branch = DiscoveryBranch {
            lower_bound: 4,
            upper_bound: 9,
        };
        let (lower, upper) = branch.split().unwrap();
        assert_eq!((lower.lower_bound, lower.upper_bound), (4, 6));
        assert_eq!((upper.lower_bound, upper.upper_bound), (7, 9));

        let leaf = DiscoveryBranch {
            lower_bound: 7,
            upper_bound: 7,
        };
        assert!(leaf.is_leaf());
        assert_eq!(leaf.split(), None);

        let mut stack = DiscoveryStack::full_range();
        let full = stack.pop().unwrap();
        assert!(stack.is_empty());
        assert!(stack.push_split(&full));
        assert_eq!(stack.pop().unwrap().lower_bound, 0);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_stack_covers_deepest_path() {
        let mut stack = DiscoveryStack::full_range();
        let mut depth = 0;

        // always descend into the lower half, keeping every upper sibling on the stack
        while let Some(branch) = stack.pop() {
            if branch.is_leaf() {
                break;
            }
            assert!(stack.push_split(&branch));
            depth += 1;
        }

        assert_eq!(depth, 48);
        assert_eq!(stack.len(), 48);
    }

    #[test]
    fn test_discovers_scattered_population() {
        for config in [
            DiscoveryConfig::default(),
            DiscoveryConfig {
                quick_find: false,
                ..Default::default()
            },
        ] {
            let uids = scattered_uids();
            let mut controller = controller(uids.iter().copied().map(Device::new).collect());

            let mut found = discover(&mut controller, &config);
            found.sort();
            assert_eq!(found, uids);

            let population = controller.get_driver();
            assert!(population.devices.iter().all(|device| device.muted));
            assert!(population
                .branches
                .iter()
                .all(|(lower_bound, upper_bound)| lower_bound <= upper_bound));
        }
    }

    #[test]
    fn test_discovery_can_be_repeated() {
        let uids = scattered_uids();
        let mut controller = controller(uids.iter().copied().map(Device::new).collect());

        assert_eq!(discover(&mut controller, &DiscoveryConfig::default()).len(), uids.len());
        assert_eq!(discover(&mut controller, &DiscoveryConfig::default()).len(), uids.len());
    }

    #[test]
    fn test_empty_bus() {
        let mut controller = controller(Vec::new());

        assert!(discover(&mut controller, &DiscoveryConfig::default()).is_empty());
        assert_eq!(
            controller.get_driver().branches.len(),
            RDM_DISCOVERY_ATTEMPTS as usize
        );
    }

    #[test]
    fn test_quick_find_skips_subdivision() {
        let mut controller = controller(vec![Device::new(uid(0x05E0, 0x0000_0A0B))]);

        let found = discover(&mut controller, &DiscoveryConfig::default());
        assert_eq!(found, [uid(0x05E0, 0x0000_0A0B)]);

        // first probe, then the probes of the now empty branch
        let branches = &controller.get_driver().branches;
        assert_eq!(branches.len(), 1 + RDM_DISCOVERY_ATTEMPTS as usize);
        assert!(branches
            .iter()
            .all(|branch| *branch == (0, RDM_MAX_UID)));
    }

    #[test]
    fn test_swapped_uid_fallback() {
        let device = Device {
            swapped_range: true,
            ..Device::new(uid(0x05E0, 0x0102_0304))
        };
        let mut controller = controller(vec![device]);
        let config = DiscoveryConfig {
            quick_find: false,
            ..Default::default()
        };

        assert_eq!(discover(&mut controller, &config), [uid(0x05E0, 0x0102_0304)]);

        let device = Device {
            swapped_range: true,
            ..Device::new(uid(0x05E0, 0x0102_0304))
        };
        let mut controller = self::controller(vec![device]);
        let config = DiscoveryConfig {
            quick_find: false,
            swap_fallback: false,
            ..Default::default()
        };

        assert!(discover(&mut controller, &config).is_empty());
    }

    #[test]
    fn test_flaky_mute_and_binding_uid() {
        let flaky = Device {
            ignored_mutes: RDM_DISCOVERY_ATTEMPTS - 1,
            ..Device::new(uid(0x05E0, 0x0000_0001))
        };
        let secondary = Device {
            binding_uid: Some(uid(0x05E0, 0x0000_0100)),
            ..Device::new(uid(0x05E0, 0x0000_0101))
        };
        let mut controller = controller(vec![flaky, secondary]);

        let mut found = discover(&mut controller, &DiscoveryConfig::default());
        found.sort();
        assert_eq!(found, [uid(0x05E0, 0x0000_0001), uid(0x05E0, 0x0000_0100)]);
    }

    #[test]
    fn test_discover_devices_into_slice() {
        let uids = scattered_uids();
        let mut controller = controller(uids.iter().copied().map(Device::new).collect());

        let mut found = [uid(0, 0); 3];
        let count =
            discover_devices(&mut controller, &DiscoveryConfig::default(), &mut found).unwrap();
        assert_eq!(count, uids.len());
        assert!(found.iter().all(|found_uid| uids.contains(found_uid)));
    }

    #[test]
    fn test_discovery_on_the_wire() {
        let wire = Wire::new();
        let responder_uid = uid(0x05E0, 0x0000_0A0B);
        wire.set_responder(rdm_devices([RdmResponderConfig {
            uid: responder_uid,
            supported_pids: &[],
            rdm_receiver_metadata: Default::default(),
        }]));

        let port = DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()).unwrap();
        port.enable().unwrap();
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());

        let mut found = Vec::new();
        let count = run_full_discovery(&mut controller, &DiscoveryConfig::default(), |uid| {
            found.push(uid)
        })
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(found, [responder_uid]);

        let branches = wire
            .sent()
            .iter()
            .filter(|frame| is_disc_unique_branch(&frame.bytes))
            .count();
        assert_eq!(branches, 1 + RDM_DISCOVERY_ATTEMPTS as usize);
    }
}
