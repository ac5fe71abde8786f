//! Boot scenarios and the run loop.

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};

use common::*;
use minnow::process::ProcessError;
use minnow::syscall::numbers::{SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_PANIC, SYS_YIELD};
use minnow::{KernelContext, KernelPanic, Pid, ProcessState, NPROC};

fn runnable(kernel: &KernelContext) -> Vec<usize> {
    kernel
        .processes()
        .iter()
        .filter(|p| p.is_runnable())
        .map(|p| p.pid().as_usize())
        .collect()
}

/// Run until the machine halts; returns the halt message.
fn run_to_halt(kernel: KernelContext, machine: &mut TestMachine) -> String {
    let payload = catch_unwind(AssertUnwindSafe(|| {
        kernel.run(machine);
    }))
    .unwrap_err();
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(_) => String::from("<non-string panic>"),
    }
}

#[test]
fn default_boot_fills_four_slots_on_exact_pool() {
    let kernel = boot(None, layout(KERNEL_TABLE_FRAMES + 4 * PROCESS_FRAMES));
    assert_eq!(runnable(&kernel), [1, 2, 3, 4]);
    assert_eq!(kernel.frames().free_frames(), 0);
    assert_eq!(kernel.current(), Pid::new(1));
    assert_eq!(kernel.ticks(), 1);

    for n in 0..4 {
        let process = &kernel.processes()[Pid::new(n + 1)];
        assert_eq!(process.regs.rip, CODE_VA as u64);
        assert_eq!(process.regs.rsp, (STACK_VA + PAGE_SIZE) as u64);
    }
}

#[test]
fn fifth_spawn_fails_without_touching_the_others() {
    for spare in [0, 3] {
        let mut kernel = boot(None, layout(KERNEL_TABLE_FRAMES + 4 * PROCESS_FRAMES + spare));
        let snapshot: Vec<_> = kernel.frames().frames().map(|(_, frame)| *frame).collect();

        assert_eq!(
            kernel.spawn(Pid::new(5), &programs()[0]),
            Err(ProcessError::OutOfMemory)
        );
        assert_eq!(kernel.frames().free_frames(), spare);
        assert_eq!(kernel.processes()[Pid::new(5)].state(), ProcessState::Free);
        let after: Vec<_> = kernel.frames().frames().map(|(_, frame)| *frame).collect();
        assert_eq!(after, snapshot);

        assert_eq!(runnable(&kernel), [1, 2, 3, 4]);
        for n in 0..4 {
            let frames = kernel.frames();
            let space = kernel.processes()[Pid::new(n + 1)].address_space().unwrap();
            let code = space.lookup(frames, va(CODE_VA)).unwrap();
            assert_eq!(&frames.memory().page(code.pa)[..tag(n).len()], tag(n));
            let data = space.lookup(frames, va(DATA_VA)).unwrap();
            assert_eq!(&frames.memory().page(data.pa)[..MESSAGE.len()], MESSAGE);
        }
    }
}

#[test]
fn boot_is_fatal_when_programs_do_not_fit() {
    let layout = layout(KERNEL_TABLE_FRAMES + 4 * PROCESS_FRAMES - 1);
    let err = KernelContext::boot(None, layout, &programs()).unwrap_err();
    assert_eq!(err, KernelPanic::Process(ProcessError::OutOfMemory));
}

#[test]
fn boot_scenarios_pick_programs() {
    let fork = boot(Some("fork"), layout(64));
    assert_eq!(runnable(&fork), [1]);
    let space = fork.processes()[Pid::new(1)].address_space().unwrap();
    let code = space.lookup(fork.frames(), va(CODE_VA)).unwrap();
    assert_eq!(&fork.frames().memory().page(code.pa)[..4], tag(4));

    let forkexit = boot(Some("forkexit"), layout(64));
    assert_eq!(runnable(&forkexit), [1]);
    let space = forkexit.processes()[Pid::new(1)].address_space().unwrap();
    let code = space.lookup(forkexit.frames(), va(CODE_VA)).unwrap();
    assert_eq!(&forkexit.frames().memory().page(code.pa)[..8], tag(5));

    assert_eq!(runnable(&boot(Some("nonsense"), layout(64))), [1, 2, 3, 4]);
}

#[test]
fn boot_without_program_is_fatal() {
    let programs = programs();
    let err = KernelContext::boot(Some("forkexit"), layout(64), &programs[..5]).unwrap_err();
    assert_eq!(err, KernelPanic::MissingProgram(5));
}

#[test]
fn kernel_template_maps_kernel_region() {
    let kernel = KernelContext::new(layout(8)).unwrap();
    let frames = kernel.frames();
    let space = kernel.kernel_space();

    assert!(space.lookup(frames, va(0)).is_none());
    let mut count = 0;
    for mapping in space.mappings(frames) {
        assert_eq!(mapping.pa.as_usize(), mapping.va.as_usize());
        assert_eq!(mapping.is_user(), mapping.va.as_usize() == 0xB_8000);
        count += 1;
    }
    assert_eq!(count, 0x10_0000 / PAGE_SIZE - 1);
    assert_eq!(frames.free_frames(), 8 - KERNEL_TABLE_FRAMES);
    assert!(kernel.processes().iter().all(|p| p.state() == ProcessState::Free));
    assert_eq!(kernel.processes().iter().count(), NPROC);
}

#[test]
fn run_loop_round_robins_until_halt() {
    let kernel = boot(None, layout(64));
    let mut machine = TestMachine::new(&[
        Step::Timer,
        Step::Timer,
        Step::Syscall(SYS_GETPID, 0),
        Step::Timer,
        Step::Timer,
        Step::Trap(13),
    ]);

    let message = run_to_halt(kernel, &mut machine);
    assert_eq!(message, "halted: Unexpected exception 13!");
    let ran: Vec<_> = machine.ran.iter().map(|pid| pid.as_usize()).collect();
    assert_eq!(ran, [1, 2, 3, 3, 4, 1]);
}

#[test]
fn run_loop_fork_exit_then_panic() {
    let kernel = boot(Some("forkexit"), layout(64));
    let mut machine = TestMachine::new(&[
        Step::Syscall(SYS_FORK, 0),
        Step::Syscall(SYS_YIELD, 0),
        Step::Syscall(SYS_EXIT, 0),
        Step::Syscall(SYS_PANIC, DATA_VA as u64),
    ]);

    let message = run_to_halt(kernel, &mut machine);
    assert_eq!(message, "halted: process 1 panicked: oh no");
    let ran: Vec<_> = machine.ran.iter().map(|pid| pid.as_usize()).collect();
    assert_eq!(ran, [1, 1, 2, 1]);
}

#[test]
fn run_loop_skips_broken_process() {
    let kernel = boot(None, layout(64));
    let mut machine = TestMachine::new(&[
        Step::Fault { addr: 0, err: 4 },
        Step::Timer,
        Step::Timer,
        Step::Timer,
        Step::Syscall(99, 0),
    ]);

    let message = run_to_halt(kernel, &mut machine);
    assert_eq!(message, "halted: Unexpected system call 99 from process 2!");
    let ran: Vec<_> = machine.ran.iter().map(|pid| pid.as_usize()).collect();
    assert_eq!(ran, [1, 2, 3, 4, 2]);
}
