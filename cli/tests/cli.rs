#![cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]

use assert_cmd::Command;
use predicates::prelude::*;

fn itlb() -> Command {
    Command::new(env!("CARGO_BIN_EXE_itlb"))
}

fn rows(stdout: &[u8]) -> Vec<(usize, f64)> {
    let text = std::str::from_utf8(stdout).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Pages,Latency_ns"));
    lines
        .map(|line| {
            let (pages, latency) = line.split_once(',').unwrap();
            (pages.parse().unwrap(), latency.parse().unwrap())
        })
        .collect()
}

#[test]
fn sweep_max_four_yields_three_rows() {
    let out = itlb()
        .args(["sweep", "--max-pages", "4", "--budget", "20000000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let rows = rows(&out);
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(rows.iter().all(|r| r.1.is_finite() && r.1 > 0.0));
}

#[test]
fn default_command_is_sweep() {
    let out = itlb()
        .args(["--max-pages", "3", "--budget", "10000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(rows(&out).len(), 2);
}

#[test]
fn sweep_respects_min_pages() {
    let out = itlb()
        .args(["sweep", "--min-pages", "126", "--max-pages", "140", "--budget", "10000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let pages: Vec<usize> = rows(&out).into_iter().map(|r| r.0).collect();
    assert_eq!(pages, vec![126, 127, 128, 136]);
}

#[test]
fn measure_prints_single_row() {
    let out = itlb()
        .args(["measure", "--pages", "8", "--iterations", "1000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = rows(&out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 8);
    assert!(rows[0].1 > 0.0);
}

#[test]
fn measure_rejects_zero_pages() {
    itlb()
        .args(["measure", "--pages", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("jump count must be at least 1"));
}

#[test]
fn measure_reports_mmap_failure() {
    // Two 64 TiB pages exceed the 47-bit user address space.
    itlb()
        .args(["measure", "--pages", "1", "--iterations", "1"])
        .args(["--page-size", "70368744177664"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("mmap of"))
        .stderr(predicate::function(|err: &str| err.matches("os error").count() == 1));
}

#[test]
fn sweep_options_conflict_with_subcommand() {
    itlb()
        .args(["--max-pages", "2", "sweep", "--max-pages", "4"])
        .assert()
        .failure()
        .code(2)
        .stdout("");
}

#[test]
fn dump_aarch64_chain() {
    itlb()
        .args(["dump", "--arch", "aarch64", "--pages", "3", "--page-size", "65536"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("page,offset,bytes,decoded\n"))
        .stdout(predicate::str::contains("0,0x0,00 40 00 14,jmp +0x10000"))
        .stdout(predicate::str::contains("1,0x10000,00 40 00 14,jmp +0x10000"))
        .stdout(predicate::str::contains("2,0x20000,c0 03 5f d6,ret"))
        .stderr(predicate::str::contains("aarch64: 3 slots, 2 jumps"));
}

#[test]
fn dump_x86_chain() {
    itlb()
        .args(["dump", "--arch", "x86-64", "--pages", "2", "--page-size", "65536"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0,0x0,e9 fb ff 00 00,jmp +0x10000"))
        .stdout(predicate::str::contains("1,0x10000,c3 90 90 90 90,ret"));
}

#[test]
fn rejects_bad_page_size() {
    itlb()
        .args(["measure", "--pages", "2", "--page-size", "3000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid --page-size"));
}

#[test]
fn rejects_unknown_arch() {
    itlb()
        .args(["dump", "--arch", "riscv64", "--pages", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown architecture"));
}

#[test]
fn info_reports_page_size() {
    itlb()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("page_size: "))
        .stdout(predicate::str::contains("icache_sync: "));
}
