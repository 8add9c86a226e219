// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Directory enumeration through the DTA
//!
//! `test_wildcard_enumeration` changes the process working directory; the
//! other test here only reads whatever directory is current.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::fs;

use retrocoff_platform_linux::thunks;
use retrocoff_platform_linux::{LinuxPlatform, activate};
use retrocoff_shim::syscalls::dta::DTA_SIZE;

fn dta_name(dta: &[u8; DTA_SIZE]) -> Vec<u8> {
    let name = &dta[30..];
    let end = name.iter().position(|&b| b == 0).unwrap();
    name[..end].to_vec()
}

#[test]
fn test_wildcard_enumeration() {
    let dir = std::env::temp_dir().join(format!("retrocoff_enum_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("Sub")).unwrap();
    fs::write(dir.join("a.c"), b"int a;").unwrap();
    fs::write(dir.join("B.H"), b"").unwrap();
    std::env::set_current_dir(&dir).unwrap();

    let mut platform = LinuxPlatform::new("C:\\test.out", None, Vec::new()).unwrap();
    let mut dta = [0x5Au8; DTA_SIZE];
    let wildcard = CString::new(".\\*.*").unwrap();
    {
        let _active = activate(&mut platform);
        assert_eq!(unsafe { thunks::retrocoff_set_dta(dta.as_mut_ptr()) }, 0);

        // the first result is the directory itself
        assert_eq!(unsafe { thunks::retrocoff_find_first(wildcard.as_ptr(), 0x16) }, 0);
        assert_eq!(dta_name(&dta), b".");
        assert_eq!(dta[21], 0x10);
        // search bookkeeping bytes are left to the program
        assert!(dta[..21].iter().all(|&b| b == 0x5A));

        let mut seen = BTreeSet::new();
        while unsafe { thunks::retrocoff_find_next() } == 0 {
            let attributes = dta[21];
            let name = dta_name(&dta);
            match name.as_slice() {
                b"Sub" => assert_eq!(attributes, 0x10),
                b"a.c" => {
                    assert_eq!(attributes, 0x20);
                    assert_eq!(u16::from_le_bytes([dta[26], dta[27]]), 6);
                }
                _ => assert_eq!(attributes, 0x20),
            }
            seen.insert(name);
        }
        let expected: BTreeSet<Vec<u8>> =
            [b"B.H".to_vec(), b"Sub".to_vec(), b"a.c".to_vec()].into_iter().collect();
        assert_eq!(seen, expected);

        // exhausted searches keep failing
        assert_eq!(unsafe { thunks::retrocoff_find_next() }, -1);

        // a new search replaces one in progress
        assert_eq!(unsafe { thunks::retrocoff_find_first(wildcard.as_ptr(), 0) }, 0);
        assert_eq!(unsafe { thunks::retrocoff_find_next() }, 0);
        assert_eq!(unsafe { thunks::retrocoff_find_first(wildcard.as_ptr(), 0) }, 0);
        let mut count = 0;
        while unsafe { thunks::retrocoff_find_next() } == 0 {
            count += 1;
        }
        assert_eq!(count, 3);

        // a plain path is a one-entry search, matched case-insensitively
        let single = CString::new("SUB").unwrap();
        assert_eq!(unsafe { thunks::retrocoff_find_first(single.as_ptr(), 0) }, 0);
        assert_eq!(dta_name(&dta), b"Sub");
        assert_eq!(unsafe { thunks::retrocoff_find_next() }, -1);

        let missing = CString::new("nothing.*").unwrap();
        assert_eq!(unsafe { thunks::retrocoff_find_first(missing.as_ptr(), 0) }, -1);
        assert_eq!(unsafe { thunks::retrocoff_find_close() }, 0);
    }
    // search failures never touch the error slot
    assert_eq!(platform.context().error(), 0);

    std::env::set_current_dir(std::env::temp_dir()).unwrap();
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_search_without_dta_leaves_nothing_open() {
    let mut platform = LinuxPlatform::new("C:\\test.out", None, Vec::new()).unwrap();
    let wildcard = CString::new(".\\*.*").unwrap();
    let _active = activate(&mut platform);

    assert_eq!(unsafe { thunks::retrocoff_find_first(wildcard.as_ptr(), 0) }, -1);
    assert_eq!(unsafe { thunks::retrocoff_find_next() }, -1);

    let mut dta = [0u8; DTA_SIZE];
    assert_eq!(unsafe { thunks::retrocoff_set_dta(dta.as_mut_ptr()) }, 0);
    assert_eq!(unsafe { thunks::retrocoff_find_next() }, -1);
    assert_eq!(dta[30], 0);
}
