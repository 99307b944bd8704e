// Copyright (c) 2025-present, the Vireo Authors.  All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use storage::{
    BaseMetaKey, ColumnFamilyIndex, DataType, Error, SetsMetaValue, Storage, StorageOptions,
};
use tempfile::TempDir;

fn open_storage() -> (TempDir, Storage) {
    let temp_dir = TempDir::new().unwrap();
    let options = Arc::new(StorageOptions::default());
    let mut db = Storage::new(options.db_instance_num, options.db_id);
    db.open(options, temp_dir.path()).unwrap();
    (temp_dir, db)
}

fn sorted(mut members: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    members.sort();
    members
}

fn as_set(members: Vec<Vec<u8>>) -> HashSet<Vec<u8>> {
    members.into_iter().collect()
}

#[test]
fn test_sadd_scard_smembers() {
    let (_dir, db) = open_storage();

    let added = db.sadd(b"k", &[b"a", b"b", b"c"]).unwrap();
    assert_eq!(added, 3);
    assert_eq!(db.scard(b"k").unwrap(), 3);
    assert_eq!(
        sorted(db.smembers(b"k").unwrap()),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
}

#[test]
fn test_sadd_deduplicates() {
    let (_dir, db) = open_storage();

    assert_eq!(db.sadd(b"k", &[b"a", b"a", b"b"]).unwrap(), 2);
    assert_eq!(db.sadd(b"k", &[b"b", b"c"]).unwrap(), 1);
    assert_eq!(db.scard(b"k").unwrap(), 3);
    assert_eq!(db.sadd(b"k", &[]).unwrap(), 0);
}

#[test]
fn test_scard_missing_key() {
    let (_dir, db) = open_storage();
    assert!(matches!(
        db.scard(b"missing"),
        Err(Error::KeyNotFound { .. })
    ));
}

#[test]
fn test_sismember() {
    let (_dir, db) = open_storage();

    db.sadd(b"k", &[b"a"]).unwrap();
    assert!(db.sismember(b"k", b"a").unwrap());
    assert!(!db.sismember(b"k", b"b").unwrap());
    assert!(!db.sismember(b"missing", b"a").unwrap());
}

#[test]
fn test_srem() {
    let (_dir, db) = open_storage();

    db.sadd(b"k", &[b"a", b"b", b"c"]).unwrap();
    assert_eq!(db.srem(b"k", &[b"a", b"x"]).unwrap(), 1);
    assert!(!db.sismember(b"k", b"a").unwrap());
    assert_eq!(db.scard(b"k").unwrap(), 2);

    // Removing the same member again is a no-op.
    assert_eq!(db.srem(b"k", &[b"a"]).unwrap(), 0);
    // Duplicate arguments count once.
    assert_eq!(db.srem(b"k", &[b"b", b"b"]).unwrap(), 1);
    assert_eq!(db.srem(b"missing", &[b"a"]).unwrap(), 0);
}

#[test]
fn test_srem_to_empty_then_recreate() {
    let (_dir, db) = open_storage();

    db.sadd(b"k", &[b"a"]).unwrap();
    assert_eq!(db.srem(b"k", &[b"a"]).unwrap(), 1);
    // Emptied sets read as absent.
    assert!(db.scard(b"k").is_err());
    assert!(db.smembers(b"k").unwrap().is_empty());

    // Recreating reuses the slot under a fresh version; no ghosts.
    assert_eq!(db.sadd(b"k", &[b"b"]).unwrap(), 1);
    assert_eq!(db.smembers(b"k").unwrap(), vec![b"b".to_vec()]);
}

#[test]
fn test_binary_safe_keys_and_members() {
    let (_dir, db) = open_storage();

    let key: &[u8] = b"bin\x00key";
    let member: &[u8] = b"mem\x00\x01ber";
    assert_eq!(db.sadd(key, &[member]).unwrap(), 1);
    assert!(db.sismember(key, member).unwrap());
    assert_eq!(db.smembers(key).unwrap(), vec![member.to_vec()]);

    // A key sharing the other's bytes as a prefix stays separate.
    assert_eq!(db.sadd(b"bin", &[b"other"]).unwrap(), 1);
    assert_eq!(db.scard(b"bin").unwrap(), 1);
    assert_eq!(db.scard(key).unwrap(), 1);
}

#[test]
fn test_sdiff_sinter_sunion() {
    let (_dir, db) = open_storage();

    db.sadd(b"s1", &[b"a", b"b", b"c", b"d"]).unwrap();
    db.sadd(b"s2", &[b"c", b"d", b"e"]).unwrap();

    assert_eq!(
        sorted(db.sdiff(&[b"s1", b"s2"]).unwrap()),
        vec![b"a".to_vec(), b"b".to_vec()]
    );
    assert_eq!(
        sorted(db.sinter(&[b"s1", b"s2"]).unwrap()),
        vec![b"c".to_vec(), b"d".to_vec()]
    );
    assert_eq!(
        sorted(db.sunion(&[b"s1", b"s2"]).unwrap()),
        vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"c".to_vec(),
            b"d".to_vec(),
            b"e".to_vec()
        ]
    );

    // A missing operand empties the intersection but not the others.
    assert!(db.sinter(&[b"s1", b"missing"]).unwrap().is_empty());
    assert_eq!(db.sdiff(&[b"s1", b"missing"]).unwrap().len(), 4);
    assert_eq!(db.sunion(&[b"s1", b"missing"]).unwrap().len(), 4);

    // No keys at all is a corrupted request.
    assert!(matches!(db.sdiff(&[]), Err(Error::Corruption { .. })));
    assert!(matches!(db.sinter(&[]), Err(Error::Corruption { .. })));
    assert!(matches!(db.sunion(&[]), Err(Error::Corruption { .. })));
}

#[test]
fn test_union_is_diff_plus_inter_plus_diff() {
    let (_dir, db) = open_storage();

    db.sadd(b"a", &[b"1", b"2", b"3", b"5", b"8"]).unwrap();
    db.sadd(b"b", &[b"2", b"4", b"5", b"9"]).unwrap();

    let union = as_set(db.sunion(&[b"a", b"b"]).unwrap());
    let mut rebuilt = as_set(db.sdiff(&[b"a", b"b"]).unwrap());
    let inter = as_set(db.sinter(&[b"a", b"b"]).unwrap());
    let diff_ba = as_set(db.sdiff(&[b"b", b"a"]).unwrap());

    // The three parts are disjoint and rebuild the union exactly.
    assert!(rebuilt.is_disjoint(&inter));
    assert!(rebuilt.is_disjoint(&diff_ba));
    assert!(inter.is_disjoint(&diff_ba));
    rebuilt.extend(inter);
    rebuilt.extend(diff_ba);
    assert_eq!(rebuilt, union);
}

#[test]
fn test_store_operations() {
    let (_dir, db) = open_storage();

    db.sadd(b"s1", &[b"a", b"b"]).unwrap();
    db.sadd(b"s2", &[b"b", b"c"]).unwrap();

    assert_eq!(db.sinterstore(b"dst1", &[b"s1", b"s2"]).unwrap(), 1);
    assert_eq!(db.smembers(b"dst1").unwrap(), vec![b"b".to_vec()]);

    assert_eq!(db.sunionstore(b"dst2", &[b"s1", b"s2"]).unwrap(), 3);
    assert_eq!(db.scard(b"dst2").unwrap(), 3);

    assert_eq!(db.sdiffstore(b"dst3", &[b"s1", b"s2"]).unwrap(), 1);
    assert_eq!(db.smembers(b"dst3").unwrap(), vec![b"a".to_vec()]);
}

#[test]
fn test_store_overwrites_existing_destination() {
    let (_dir, db) = open_storage();

    db.sadd(b"dst", &[b"old1", b"old2", b"old3"]).unwrap();
    db.sadd(b"s1", &[b"a"]).unwrap();
    db.sadd(b"s2", &[b"b"]).unwrap();

    assert_eq!(db.sunionstore(b"dst", &[b"s1", b"s2"]).unwrap(), 2);
    // No ghost members from the displaced incarnation.
    assert_eq!(
        sorted(db.smembers(b"dst").unwrap()),
        vec![b"a".to_vec(), b"b".to_vec()]
    );
    assert_eq!(
        as_set(db.smembers(b"dst").unwrap()),
        as_set(db.sunion(&[b"s1", b"s2"]).unwrap())
    );

    // Storing an empty result leaves the destination absent.
    assert_eq!(db.sinterstore(b"dst", &[b"s1", b"s2"]).unwrap(), 0);
    assert!(db.scard(b"dst").is_err());
}

#[test]
fn test_smove() {
    let (_dir, db) = open_storage();

    db.sadd(b"src", &[b"x"]).unwrap();
    assert!(db.smove(b"src", b"dst", b"x").unwrap());
    assert!(!db.sismember(b"src", b"x").unwrap());
    assert!(db.sismember(b"dst", b"x").unwrap());

    // The member is gone from the source now.
    assert!(!db.smove(b"src", b"dst", b"x").unwrap());
    assert!(!db.smove(b"missing", b"dst", b"x").unwrap());
}

#[test]
fn test_smove_into_existing_destination() {
    let (_dir, db) = open_storage();

    db.sadd(b"src", &[b"x", b"y"]).unwrap();
    db.sadd(b"dst", &[b"x", b"z"]).unwrap();

    // Destination already holds the member: source still shrinks.
    assert!(db.smove(b"src", b"dst", b"x").unwrap());
    assert_eq!(db.scard(b"src").unwrap(), 1);
    assert_eq!(db.scard(b"dst").unwrap(), 2);
}

#[test]
fn test_smove_same_source_and_destination() {
    let (_dir, db) = open_storage();

    db.sadd(b"k", &[b"m"]).unwrap();
    // Degenerates to a membership test without mutating anything.
    assert!(db.smove(b"k", b"k", b"m").unwrap());
    assert!(!db.smove(b"k", b"k", b"other").unwrap());
    assert_eq!(db.scard(b"k").unwrap(), 1);
}

#[test]
fn test_wrong_type_key() {
    let (_dir, db) = open_storage();

    // Plant a live String meta under the key, bypassing the Set API.
    let inst = &db.insts[0];
    let meta_cf = inst.handle(ColumnFamilyIndex::MetaCF).unwrap();
    let string_meta = SetsMetaValue::new(DataType::String, Bytes::from_static(b"hi")).encode();
    let meta_key = BaseMetaKey::new(b"k").encode();
    inst.db
        .as_ref()
        .unwrap()
        .put_cf(&meta_cf, &meta_key, &string_meta)
        .unwrap();

    let err = db.sadd(b"k", &[b"m"]).unwrap_err();
    assert!(err.to_string().contains("WRONGTYPE"), "got: {err}");
    let err = db.scard(b"k").unwrap_err();
    assert!(err.to_string().contains("WRONGTYPE"), "got: {err}");
    assert!(db.smembers(b"k").is_err());

    // Deleting the foreign key frees the slot for a Set again.
    inst.db
        .as_ref()
        .unwrap()
        .delete_cf(&meta_cf, &meta_key)
        .unwrap();
    assert_eq!(db.sadd(b"k", &[b"m"]).unwrap(), 1);
    assert_eq!(db.scard(b"k").unwrap(), 1);
}

#[test]
fn test_spop_partial_and_full() {
    let (_dir, db) = open_storage();

    let members: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    let member_refs: Vec<&[u8]> = members.iter().map(|m| m.as_bytes()).collect();
    db.sadd(b"k", &member_refs).unwrap();

    let popped = db.spop(b"k", 3).unwrap();
    assert_eq!(popped.len(), 3);
    assert_eq!(popped.iter().collect::<HashSet<_>>().len(), 3);
    for member in &popped {
        assert!(members.iter().any(|m| m.as_bytes() == member.as_slice()));
        assert!(!db.sismember(b"k", member).unwrap());
    }
    assert_eq!(db.scard(b"k").unwrap(), 7);

    // Popping more than remains destroys the whole set.
    let rest = db.spop(b"k", 100).unwrap();
    assert_eq!(rest.len(), 7);
    assert!(db.scard(b"k").is_err());
    assert!(db.spop(b"k", 1).unwrap().is_empty());
    assert!(db.spop(b"k", 0).unwrap().is_empty());
}

#[test]
fn test_srandmember() {
    let (_dir, db) = open_storage();

    let members: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
    let member_refs: Vec<&[u8]> = members.iter().map(|m| m.as_bytes()).collect();
    db.sadd(b"k", &member_refs).unwrap();

    let picked = db.srandmember(b"k", 3).unwrap();
    assert_eq!(picked.len(), 3);
    assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 3);

    // Asking for more than the cardinality caps at the cardinality.
    let all = db.srandmember(b"k", 50).unwrap();
    assert_eq!(as_set(all), as_set(db.smembers(b"k").unwrap()));

    // Negative counts return exactly that many, duplicates allowed.
    let with_dups = db.srandmember(b"k", -9).unwrap();
    assert_eq!(with_dups.len(), 9);
    for member in &with_dups {
        assert!(db.sismember(b"k", member).unwrap());
    }

    assert!(db.srandmember(b"k", 0).unwrap().is_empty());
    assert!(db.srandmember(b"missing", 3).unwrap().is_empty());
    // Reads never mutate.
    assert_eq!(db.scard(b"k").unwrap(), 5);
}

#[test]
fn test_sscan_pagination_with_tail_wildcard() {
    let (_dir, db) = open_storage();

    let mut expected = Vec::new();
    for i in 0..30 {
        let member = format!("m{i:02}");
        db.sadd(b"k", &[member.as_bytes()]).unwrap();
        expected.push(member.into_bytes());
    }
    db.sadd(b"k", &[b"other1", b"other2"]).unwrap();

    let mut collected = Vec::new();
    let mut cursor = 0;
    let mut rounds = 0;
    loop {
        let (page, next_cursor) = db.sscan(b"k", cursor, b"m*", 10).unwrap();
        collected.extend(page);
        rounds += 1;
        if next_cursor == 0 {
            break;
        }
        cursor = next_cursor;
        assert!(rounds < 10, "sscan failed to terminate");
    }

    // The tail-wildcard fast path walks only the literal prefix, so every
    // page is full and nothing outside `m` is visited.
    assert_eq!(sorted(collected), expected);
    assert_eq!(rounds, 3);
}

#[test]
fn test_sscan_patterns_and_edge_cases() {
    let (_dir, db) = open_storage();

    db.sadd(b"k", &[b"apple", b"apricot", b"banana", b"cherry"])
        .unwrap();

    let (page, next_cursor) = db.sscan(b"k", 0, b"*", 100).unwrap();
    assert_eq!(page.len(), 4);
    assert_eq!(next_cursor, 0);

    let (page, _) = db.sscan(b"k", 0, b"ap*", 100).unwrap();
    assert_eq!(
        sorted(page),
        vec![b"apple".to_vec(), b"apricot".to_vec()]
    );

    let (page, _) = db.sscan(b"k", 0, b"?anana", 100).unwrap();
    assert_eq!(page, vec![b"banana".to_vec()]);

    assert_eq!(db.sscan(b"k", -1, b"*", 10).unwrap(), (Vec::new(), 0));
    assert_eq!(db.sscan(b"missing", 0, b"*", 10).unwrap(), (Vec::new(), 0));

    // An unknown cursor restarts from the beginning.
    let (page, _) = db.sscan(b"k", 9999, b"*", 100).unwrap();
    assert_eq!(page.len(), 4);
}

#[test]
fn test_rename_and_renamenx() {
    let (_dir, db) = open_storage();

    db.sadd(b"src", &[b"a", b"b"]).unwrap();
    db.rename(b"src", b"dst").unwrap();

    assert!(db.scard(b"src").is_err());
    assert_eq!(
        sorted(db.smembers(b"dst").unwrap()),
        vec![b"a".to_vec(), b"b".to_vec()]
    );

    assert!(matches!(
        db.rename(b"missing", b"dst"),
        Err(Error::KeyNotFound { .. })
    ));

    // NX refuses a live destination, allows a vacant one.
    db.sadd(b"src2", &[b"x"]).unwrap();
    assert!(matches!(
        db.renamenx(b"src2", b"dst"),
        Err(Error::Corruption { .. })
    ));
    db.renamenx(b"src2", b"fresh").unwrap();
    assert!(db.sismember(b"fresh", b"x").unwrap());

    // Renaming a key onto itself succeeds without touching it.
    db.rename(b"dst", b"dst").unwrap();
    assert_eq!(db.scard(b"dst").unwrap(), 2);
}

#[test]
fn test_rename_leaves_no_ghosts() {
    let (_dir, db) = open_storage();

    db.sadd(b"dst", &[b"old"]).unwrap();
    db.sadd(b"src", &[b"new"]).unwrap();
    db.rename(b"src", b"dst").unwrap();

    assert_eq!(db.smembers(b"dst").unwrap(), vec![b"new".to_vec()]);
    // The source slot can be reused immediately.
    assert_eq!(db.sadd(b"src", &[b"again"]).unwrap(), 1);
    assert_eq!(db.smembers(b"src").unwrap(), vec![b"again".to_vec()]);
}

#[test]
fn test_cardinality_tracks_membership() {
    let (_dir, db) = open_storage();

    // Interleaved adds and removes keep SCARD equal to |SMEMBERS|.
    for i in 0..60u32 {
        let member = format!("m{}", i % 20);
        db.sadd(b"k", &[member.as_bytes()]).unwrap();
        if i % 3 == 0 {
            let victim = format!("m{}", (i * 7) % 20);
            db.srem(b"k", &[victim.as_bytes()]).unwrap();
        }
        match db.scard(b"k") {
            Ok(count) => assert_eq!(count as usize, db.smembers(b"k").unwrap().len()),
            Err(_) => assert!(db.smembers(b"k").unwrap().is_empty()),
        }
    }
}

#[test]
fn test_concurrent_sadd_disjoint_members() {
    let (_dir, db) = open_storage();
    let db = Arc::new(db);

    let mut handles = Vec::new();
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                let member = format!("t{t}-m{i}");
                db.sadd(b"shared", &[member.as_bytes()]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.scard(b"shared").unwrap(), 400);
    assert_eq!(db.smembers(b"shared").unwrap().len(), 400);
}

#[test]
fn test_multiple_instances_route_keys() {
    let temp_dir = TempDir::new().unwrap();
    let mut options = StorageOptions::default();
    options.set_db_instance_num(3);
    let options = Arc::new(options);
    let mut db = Storage::new(options.db_instance_num, options.db_id);
    db.open(options, temp_dir.path()).unwrap();

    for i in 0..30 {
        let key = format!("key{i}");
        assert_eq!(db.sadd(key.as_bytes(), &[b"m"]).unwrap(), 1);
        assert_eq!(db.scard(key.as_bytes()).unwrap(), 1);
        assert!(db.sismember(key.as_bytes(), b"m").unwrap());
    }
}
