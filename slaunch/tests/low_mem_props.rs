// Property tests for staging, marshalling and the SLB patch

mod common;

use nos_slaunch::config::{LOW_MEM_MAX, LOW_MEM_MIN, PAGE_SIZE, SLB_BASE, SLB_PARAMS_OFFSET};
use nos_slaunch::kernel_if::boot_params::marshal;
use nos_slaunch::memory::stage_page;
use nos_slaunch::security::SecureLoaderBlock;
use nos_slaunch::{BootParameters, LowMemoryMap, SlaunchError};
use proptest::prelude::*;
use x86_64::PhysAddr;

use common::{Event, EventLog, Memory};

const PAGE: u64 = PAGE_SIZE as u64;

/// Whether some single region can hold an aligned page inside the window
fn has_fit(regions: &[(u64, u64)]) -> bool {
    regions.iter().any(|&(base, len)| {
        let lo = base.max(LOW_MEM_MIN).div_ceil(PAGE) * PAGE;
        let hi = (base + len).min(LOW_MEM_MAX);
        lo + PAGE <= hi
    })
}

proptest! {
    #[test]
    fn prop_staged_page_inside_window(
        regions in prop::collection::vec((0u64..0xA_0000, 1u64..0x4000), 0..8)
    ) {
        let mut map = LowMemoryMap::new();
        for &(base, len) in &regions {
            map.add_usable(base, len);
        }

        match stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX) {
            Ok(page) => {
                let addr = page.addr().as_u64();
                prop_assert!(addr >= LOW_MEM_MIN);
                prop_assert!(addr + PAGE <= LOW_MEM_MAX);
                prop_assert_eq!(addr % PAGE, 0);
                prop_assert!(regions.iter().any(|&(b, l)| b <= addr && addr + PAGE <= b + l));
            }
            Err(err) => {
                prop_assert_eq!(err, SlaunchError::OutOfMemory);
                prop_assert!(!has_fit(&regions));
            }
        }
    }

    #[test]
    fn prop_marshal_copies_verbatim(bytes in prop::collection::vec(any::<u8>(), 0..=PAGE_SIZE)) {
        let log = EventLog::default();
        let mut mem = Memory::new(log.clone());
        let mut map = LowMemoryMap::new();
        map.add_usable(0, 0x9_FC00);
        map.reserve_legacy_fixtures();

        let page = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap();
        let params = BootParameters::new(&bytes, PhysAddr::new(0x0010_0000)).unwrap();
        let dest = marshal(&params, &page, &mut mem);

        prop_assert_eq!(dest, page.addr());
        prop_assert_eq!(mem.dump(dest.as_u64(), bytes.len()), bytes.clone());
        prop_assert_eq!(
            log.borrow().clone(),
            vec![Event::Write { addr: dest.as_u64(), len: bytes.len() }]
        );
    }

    #[test]
    fn prop_slb_patch_touches_four_bytes(
        image in prop::collection::vec(any::<u8>(), 64),
        pointer in any::<u32>()
    ) {
        let log = EventLog::default();
        let mut mem = Memory::new(log.clone());
        mem.preload(SLB_BASE, &image);

        let slb = SecureLoaderBlock::new(PhysAddr::new(SLB_BASE), SLB_PARAMS_OFFSET);
        slb.patch_params_pointer(&mut mem, pointer);

        let after = mem.dump(SLB_BASE, 64);
        let field = SLB_PARAMS_OFFSET..SLB_PARAMS_OFFSET + 4;
        for (i, (a, b)) in image.iter().zip(&after).enumerate() {
            if !field.contains(&i) {
                prop_assert_eq!(a, b);
            }
        }
        prop_assert_eq!(&after[field], &pointer.to_le_bytes()[..]);
        prop_assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn prop_oversized_params_rejected(size in (PAGE_SIZE + 1)..(3 * PAGE_SIZE)) {
        let bytes = vec![0u8; size];
        prop_assert_eq!(
            BootParameters::new(&bytes, PhysAddr::new(0x0010_0000)).unwrap_err(),
            SlaunchError::ParamsTooLarge { size, capacity: PAGE_SIZE }
        );
    }
}
