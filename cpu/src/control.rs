//! The register file and function unit.
//!
//! One call to [`Cpu::step`] performs one fetch/decode/execute cycle:
//! read and increment the sequence control register, decode the
//! instruction word, form the effective address, and apply one of the
//! sixteen function codes.
//!
//! Two architectural quirks drive the shape of this code.  First, the
//! SCR and B register are ordinary store cells whose addresses depend
//! on the active priority level, so "the SCR" is always an indirection
//! through [`Cpu::scr_index`]; programs can and do read and write it
//! as memory.  Second, multiply, divide and shift treat A and Q as one
//! 36-bit signed accumulator, so their intermediates widen to `i64`
//! with explicit sign extension before the halves are masked back out.
//!
//! Every instruction also accumulates an estimate of the real
//! machine's execution time in microseconds, taken from the 903
//! facts card.

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::diag::Diag;
use crate::io::{
    Peripherals, PunchResult, TtyRead, IO_LEVEL_TERMINATE, IO_PLOTTER, IO_PUNCH, IO_READER,
    IO_TTY_IN, IO_TTY_OUT,
};
use crate::session::StopReason;
use crate::store::{Store, INITIAL_ORDERS_FIRST, INITIAL_ORDERS_LAST};

/// Store addresses of the SCR and B register for levels 1 and 4.
pub const SCR_LEVEL_1: u32 = 0;
pub const B_LEVEL_1: u32 = 1;
pub const SCR_LEVEL_4: u32 = 6;
pub const B_LEVEL_4: u32 = 7;

pub struct Cpu {
    pub a: Word,
    pub q: Word,
    /// Active priority level, 1 or 4.
    pub level: u32,
    /// Store address of the current SCR.
    pub scr_index: u32,
    /// Store address of the current B register.
    pub b_index: u32,
    /// Estimated elapsed machine time in microseconds.
    pub elapsed_us: u64,
    /// Executions of each function code.
    pub function_counts: [u64; 16],
}

/// What one executed instruction looked like, for the session's
/// monitoring and trace decisions.
pub struct Step {
    /// Where the instruction was fetched from.
    pub last_scr: Address,
    pub instruction: Instruction,
    /// The address field with the module bits of the fetch location
    /// ORed in, before B modification.
    pub qualified_address: u32,
    /// A conditional jump (function 7 or 9) was taken.
    pub jump_taken: bool,
    /// A device demanded orderly termination.
    pub stop: Option<StopReason>,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            a: 0,
            q: 0,
            level: 1,
            scr_index: SCR_LEVEL_1,
            b_index: B_LEVEL_1,
            elapsed_us: 0,
            function_counts: [0; 16],
        }
    }

    /// Execute the instruction the current SCR points at.
    pub fn step(
        &mut self,
        store: &mut Store,
        per: &mut Peripherals,
        diag: &mut Diag,
    ) -> Result<Step, Alarm> {
        let last_scr = store.cell(self.scr_index);
        if last_scr >= STORE_WORDS as u32 {
            return Err(Alarm::ScrOutOfBounds(last_scr));
        }
        store.set_cell(self.scr_index, last_scr + 1);

        let instruction = Instruction::from(store.cell(last_scr));
        let f = instruction.function();
        let a = instruction.address() | (last_scr & MODULE_MASK);
        let location = Address::new(last_scr);
        self.function_counts[f as usize] += 1;

        let m = if instruction.is_b_modified() {
            self.elapsed_us += 6;
            (a + store.cell(self.b_index)) & ADDRESS_MASK_16
        } else {
            a & ADDRESS_MASK_16
        };

        let mut step = Step {
            last_scr: location,
            instruction,
            qualified_address: a,
            jump_taken: false,
            stop: None,
        };

        match f {
            0 => {
                // Load B
                let w = self.fetch(store, m, instruction, location)?;
                self.q = w;
                store.set_cell(self.b_index, w);
                self.elapsed_us += 30;
            }
            1 => {
                // Add
                let w = self.fetch(store, m, instruction, location)?;
                self.a = (self.a + w) & WORD_MASK;
                self.elapsed_us += 23;
            }
            2 => {
                // Negate and add
                let w = self.fetch(store, m, instruction, location)?;
                self.q = w;
                self.a = w.wrapping_sub(self.a) & WORD_MASK;
                self.elapsed_us += 26;
            }
            3 => {
                // Store Q
                self.write(store, m, self.q >> 1, instruction, location, diag)?;
                self.elapsed_us += 25;
            }
            4 => {
                // Load A
                self.a = self.fetch(store, m, instruction, location)?;
                self.elapsed_us += 23;
            }
            5 => {
                // Store A
                self.write(store, m, self.a, instruction, location, diag)?;
                self.elapsed_us += 25;
            }
            6 => {
                // Collate
                self.a &= self.fetch(store, m, instruction, location)?;
                self.elapsed_us += 23;
            }
            7 => {
                // Jump if zero
                if self.a == 0 {
                    step.jump_taken = true;
                    store.set_cell(self.scr_index, m);
                    self.elapsed_us += 28;
                }
                if self.a > 0 {
                    self.elapsed_us += 21;
                } else {
                    self.elapsed_us += 20;
                }
            }
            8 => {
                // Jump unconditional
                store.set_cell(self.scr_index, m);
                self.elapsed_us += 23;
            }
            9 => {
                // Jump if negative
                if self.a >= SIGN_BIT {
                    step.jump_taken = true;
                    store.set_cell(self.scr_index, m);
                    self.elapsed_us += 25;
                }
                self.elapsed_us += 20;
            }
            10 => {
                // Increment in store
                let w = self.fetch(store, m, instruction, location)?;
                self.write(store, m, (w + 1) & WORD_MASK, instruction, location, diag)?;
                self.elapsed_us += 24;
            }
            11 => {
                // Store S
                let scr = store.cell(self.scr_index);
                self.q = scr & MODULE_MASK;
                self.write(store, m, scr & ADDRESS_MASK, instruction, location, diag)?;
                self.elapsed_us += 30;
            }
            12 => {
                // Multiply: A:Q becomes the doubled 36-bit product,
                // with the sign of the multiplier in the low bit of Q.
                let w = self.fetch(store, m, instruction, location)?;
                let al = as_signed(self.a) as i64;
                let sl = as_signed(w) as i64;
                let product = al * sl;
                self.q = as_word(product << 1);
                if al < 0 {
                    self.q |= 1;
                }
                self.a = as_word(product >> 17);
                self.elapsed_us += 79;
            }
            13 => {
                // Divide.  The low bit of A is always set afterwards.
                let w = self.fetch(store, m, instruction, location)?;
                let divisor = as_signed(w) as i64;
                if divisor == 0 {
                    return Err(Alarm::DividedByZero {
                        instruction,
                        location,
                    });
                }
                let aq = join_aq(self.a, self.q);
                let quotient = as_word((aq / divisor) >> 1);
                self.a = quotient | 1;
                self.q = quotient & 0o777776;
                self.elapsed_us += 79;
            }
            14 => {
                // Shift the 36-bit A:Q pair; right shifts are
                // arithmetic.
                let places = m & ADDRESS_MASK;
                let mut aq = join_aq(self.a, self.q);
                if places <= 2047 {
                    self.elapsed_us += (24 + 7 * places) as u64;
                    aq <<= places.min(36);
                } else if places >= 6144 {
                    let places = 8192 - places;
                    self.elapsed_us += (24 + 7 * places) as u64;
                    aq >>= places.min(36);
                } else {
                    return Err(Alarm::UnsupportedShift {
                        instruction,
                        location,
                        places,
                    });
                }
                let (high, low) = split_aq(aq);
                self.a = high;
                self.q = low;
            }
            15 => self.input_output(m, &mut step, per, diag)?,
            _ => unreachable!("function codes are four bits"),
        }
        Ok(step)
    }

    /// Function 15: dispatch on the low thirteen bits of the effective
    /// address.
    fn input_output(
        &mut self,
        m: u32,
        step: &mut Step,
        per: &mut Peripherals,
        diag: &mut Diag,
    ) -> Result<(), Alarm> {
        let code = m & ADDRESS_MASK;
        match code {
            IO_READER => match per.read_tape(diag)? {
                Some(ch) => {
                    self.a = ((self.a << 7) | ch as Word) & WORD_MASK;
                    self.elapsed_us += 4_000; // 250 ch/s reader
                }
                None => step.stop = Some(StopReason::ReaderExhausted),
            },
            IO_TTY_IN => match per.read_tty(diag)? {
                TtyRead::Byte(ch) => {
                    self.a = ((self.a << 7) | ch as Word) & WORD_MASK;
                    self.elapsed_us += 100_000; // 10 ch/s teletype
                }
                TtyRead::Exhausted => step.stop = Some(StopReason::TtyExhausted),
                TtyRead::Capped => step.stop = Some(StopReason::PunchOverflow),
            },
            IO_PLOTTER => {
                per.plot(self.a, diag);
                // Pen movement is an order of magnitude slower than a
                // plain step.
                self.elapsed_us += if self.a >= 16 { 20_000 } else { 3_300 };
            }
            IO_PUNCH => match per.punch_byte((self.a & 255) as u8, diag)? {
                PunchResult::Punched => self.elapsed_us += 9_091, // 110 ch/s punch
                PunchResult::Overflow => step.stop = Some(StopReason::PunchOverflow),
            },
            IO_TTY_OUT => {
                per.write_tty(self.a & 255, diag);
                self.elapsed_us += 100_000;
            }
            IO_LEVEL_TERMINATE => {
                event!(Level::DEBUG, "level terminate: switching to level 4");
                self.level = 4;
                self.scr_index = SCR_LEVEL_4;
                self.b_index = B_LEVEL_4;
                self.elapsed_us += 19;
            }
            _ => {
                return Err(Alarm::UnsupportedIo {
                    instruction: step.instruction,
                    location: step.last_scr,
                    code,
                })
            }
        }
        Ok(())
    }

    fn fetch(
        &self,
        store: &Store,
        m: u32,
        instruction: Instruction,
        location: Address,
    ) -> Result<Word, Alarm> {
        store.get(m).ok_or(Alarm::AddressOutOfBounds {
            instruction,
            location,
            address: m,
        })
    }

    /// Store write with the level-1 protection of the initial orders:
    /// the bootstrap must survive whatever a level-1 program does.
    fn write(
        &mut self,
        store: &mut Store,
        m: u32,
        w: Word,
        instruction: Instruction,
        location: Address,
        diag: &mut Diag,
    ) -> Result<(), Alarm> {
        if self.level == 1 && (INITIAL_ORDERS_FIRST..=INITIAL_ORDERS_LAST).contains(&m) {
            diag.report(format_args!(
                "Write to initial instructions ignored in priority level 1"
            ));
            return Ok(());
        }
        if store.set(m, w) {
            Ok(())
        } else {
            Err(Alarm::AddressOutOfBounds {
                instruction,
                location,
                address: m,
            })
        }
    }
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::io::{LazyInput, Plotter, Punch, Reader, TtyInput, TtyOutput};
    use crate::io::tests::SharedBuffer;
    use crate::store::Store;
    use test_strategy::proptest;

    fn quiet() -> Diag {
        Diag::to_stderr(0)
    }

    fn peripherals() -> Peripherals {
        peripherals_with(Vec::new(), Vec::new())
    }

    fn peripherals_with(tape: Vec<u8>, tty: Vec<u8>) -> Peripherals {
        Peripherals {
            reader: Reader::new(LazyInput::from_bytes(tape)),
            punch: Punch::new("unused-punch".into()),
            tty_in: TtyInput::new(LazyInput::from_bytes(tty)),
            tty_out: TtyOutput::to_writer(Box::new(io::sink())),
            plotter: Plotter::new("unused-plot".into(), 64, 64, 1),
        }
    }

    /// Place `instruction` at `at`, point the SCR there, execute it.
    fn exec(
        cpu: &mut Cpu,
        store: &mut Store,
        per: &mut Peripherals,
        instruction: Instruction,
        at: u32,
    ) -> Step {
        store.set_cell(at, instruction.bits());
        store.set_cell(cpu.scr_index, at);
        cpu.step(store, per, &mut quiet()).unwrap()
    }

    #[test]
    fn load_b_sets_q_and_b() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(500, 42);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 0, 500), 10);
        assert_eq!(cpu.q, 42);
        assert_eq!(store.cell(B_LEVEL_1), 42);
        assert_eq!(cpu.elapsed_us, 30);
    }

    #[test]
    fn add_wraps_modulo_two_to_the_eighteen() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o777777;
        store.set_cell(500, 1);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 1, 500), 10);
        assert_eq!(cpu.a, 0);
    }

    #[proptest]
    fn adding_zero_is_the_identity(#[strategy(0u32..0o1000000)] w: Word) {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = w;
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 1, 500), 10);
        assert_eq!(cpu.a, w);
    }

    #[test]
    fn negate_and_add_subtracts_a_from_operand() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 5;
        store.set_cell(500, 3);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 2, 500), 10);
        assert_eq!(cpu.a, 0o777776); // 3 - 5 = -2
        assert_eq!(cpu.q, 3);
    }

    #[test]
    fn store_q_writes_q_shifted_right_once() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.q = 0b1011;
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 3, 500), 10);
        assert_eq!(store.cell(500), 0b101);
    }

    #[test]
    fn collate_ands_into_a() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o770077;
        store.set_cell(500, 0o707070);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 6, 500), 10);
        assert_eq!(cpu.a, 0o700070);
    }

    #[test]
    fn level_one_writes_to_initial_orders_are_suppressed() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        let mut diag = quiet();
        store.install_initial_orders(&mut diag);
        let before = store.cell(8185);
        cpu.a = 0o123456;
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 5, 8185), 10);
        assert_eq!(store.cell(8185), before);
    }

    #[test]
    fn level_four_may_overwrite_initial_orders() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        let mut diag = quiet();
        store.install_initial_orders(&mut diag);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 7168), 10);
        assert_eq!(cpu.level, 4);
        cpu.a = 0o123456;
        // SCR now lives at cell 6.
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 5, 8185), 20);
        assert_eq!(store.cell(8185), 0o123456);
    }

    #[test]
    fn jump_if_zero_taken_and_not_taken() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 7, 300), 10);
        assert!(step.jump_taken);
        assert_eq!(store.cell(SCR_LEVEL_1), 300);
        assert_eq!(cpu.elapsed_us, 48);

        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 7;
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 7, 300), 10);
        assert!(!step.jump_taken);
        assert_eq!(store.cell(SCR_LEVEL_1), 11);
        assert_eq!(cpu.elapsed_us, 21);
    }

    #[test]
    fn jump_if_negative_tests_the_sign_bit() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o400000;
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 9, 300), 10);
        assert!(step.jump_taken);
        assert_eq!(store.cell(SCR_LEVEL_1), 300);
        assert_eq!(cpu.elapsed_us, 45);

        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o377777;
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 9, 300), 10);
        assert!(!step.jump_taken);
        assert_eq!(cpu.elapsed_us, 20);
    }

    #[test]
    fn unconditional_jump_rewrites_the_scr_cell() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 8, 100), 100);
        assert_eq!(store.cell(SCR_LEVEL_1), 100); // a dynamic stop
    }

    #[test]
    fn increment_in_store_wraps() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(500, 0o777777);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 10, 500), 10);
        assert_eq!(store.cell(500), 0);
    }

    #[test]
    fn store_s_splits_the_scr_into_module_and_offset() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        // Execute from module 1: the stored offset and the module bits
        // in Q describe the incremented SCR.
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 11, 100), 8292);
        assert_eq!(cpu.q, 0o020000);
        assert_eq!(store.cell(8192 | 100), 8293 & 8191);
    }

    #[test]
    fn effective_addresses_inherit_the_fetch_module() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(8192 + 5, 77);
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 4, 5), 8250);
        assert_eq!(cpu.a, 77);
        assert_eq!(step.qualified_address, 8192 + 5);
    }

    #[test]
    fn b_modification_adds_the_current_b_register() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(B_LEVEL_1, 10);
        store.set_cell(110, 77);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(1, 4, 100), 10);
        assert_eq!(cpu.a, 77);
        assert_eq!(cpu.elapsed_us, 23 + 6);
    }

    #[test]
    fn out_of_store_effective_address_is_fatal() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(B_LEVEL_1, 20000);
        store.set_cell(10, Instruction::from_parts(1, 4, 0).bits());
        store.set_cell(SCR_LEVEL_1, 10);
        let result = cpu.step(&mut store, &mut per, &mut quiet());
        assert!(matches!(result, Err(Alarm::AddressOutOfBounds { address: 20000, .. })));
    }

    #[test]
    fn scr_past_the_store_end_is_fatal() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(SCR_LEVEL_1, STORE_WORDS as u32);
        let result = cpu.step(&mut store, &mut per, &mut quiet());
        assert!(matches!(result, Err(Alarm::ScrOutOfBounds(16384))));
    }

    #[test]
    fn multiply_doubles_the_product_into_q() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 2;
        store.set_cell(500, 3);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 12, 500), 10);
        assert_eq!(cpu.a, 0);
        assert_eq!(cpu.q, 12); // 2 * 3 = 6, doubled
    }

    #[test]
    fn multiply_records_a_negative_multiplier_in_the_low_bit_of_q() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o777777; // -1
        store.set_cell(500, 1);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 12, 500), 10);
        assert_eq!(cpu.a, 0o777777);
        assert_eq!(cpu.q, 0o777777); // -2 masked, low bit forced on
    }

    #[test]
    fn multiply_then_full_right_shift_recovers_the_high_word() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 1234;
        store.set_cell(500, 5678);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 12, 500), 10);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 14, 8192 - 18), 12);
        assert_eq!(cpu.q as i64, (1234i64 * 5678) >> 17);
    }

    #[test]
    fn divide_halves_the_quotient_and_forces_the_low_bit_of_a() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0;
        cpu.q = 12;
        store.set_cell(500, 3);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 13, 500), 10);
        assert_eq!(cpu.a, 3); // (12/3) >> 1 = 2, low bit forced
        assert_eq!(cpu.q, 2);
    }

    #[test]
    fn divide_of_a_negative_dividend() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o777777;
        cpu.q = as_word(-12); // A:Q = -12
        store.set_cell(500, 3);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 13, 500), 10);
        assert_eq!(cpu.a, 0o777777); // -2 with the low bit forced on
        assert_eq!(cpu.q, 0o777776);
    }

    #[test]
    fn divide_by_zero_is_fatal() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.q = 5;
        store.set_cell(10, Instruction::from_parts(0, 13, 500).bits());
        store.set_cell(SCR_LEVEL_1, 10);
        let result = cpu.step(&mut store, &mut per, &mut quiet());
        assert!(matches!(result, Err(Alarm::DividedByZero { .. })));
    }

    #[test]
    fn shift_left_then_right_is_the_identity_on_a() {
        for k in 1..=17u32 {
            for x in [0, 1, 0o777777] {
                let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
                cpu.a = x;
                exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 14, k), 10);
                exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 14, 8192 - k), 12);
                assert_eq!(cpu.a, x, "k={k} x={x:o}");
            }
        }
    }

    #[test]
    fn shift_moves_bits_between_q_and_a() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.q = 0o400000;
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 14, 1), 10);
        assert_eq!(cpu.a, 1);
        assert_eq!(cpu.q, 0);
        assert_eq!(cpu.elapsed_us, 24 + 7);
    }

    #[test]
    fn right_shift_is_arithmetic() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o400000; // negative
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 14, 8192 - 1), 10);
        assert_eq!(cpu.a, 0o600000); // sign bit duplicated
        assert_eq!(cpu.elapsed_us, 24 + 7);
    }

    #[test]
    fn shift_counts_in_the_dead_range_are_fatal() {
        for places in [2048u32, 4000, 6143] {
            let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
            store.set_cell(10, Instruction::from_parts(0, 14, places).bits());
            store.set_cell(SCR_LEVEL_1, 10);
            let result = cpu.step(&mut store, &mut per, &mut quiet());
            assert!(matches!(result, Err(Alarm::UnsupportedShift { .. })), "places={places}");
        }
    }

    #[test]
    fn reader_bytes_accumulate_into_a_seven_bits_at_a_time() {
        let (mut cpu, mut store) = (Cpu::new(), Store::cleared());
        let mut per = peripherals_with(vec![1, 2], Vec::new());
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 2048), 10);
        assert_eq!(cpu.a, 1);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 2048), 12);
        assert_eq!(cpu.a, (1 << 7) | 2);
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 2048), 14);
        assert!(matches!(step.stop, Some(StopReason::ReaderExhausted)));
    }

    #[test]
    fn teletype_input_accumulates_and_echoes() {
        let buffer = SharedBuffer::default();
        let (mut cpu, mut store) = (Cpu::new(), Store::cleared());
        let mut per = Peripherals {
            reader: Reader::new(LazyInput::from_bytes(Vec::new())),
            punch: Punch::new("unused-punch".into()),
            tty_in: TtyInput::new(LazyInput::from_bytes(vec![b'Y'])),
            tty_out: TtyOutput::to_writer(Box::new(buffer.clone())),
            plotter: Plotter::new("unused-plot".into(), 64, 64, 1),
        };
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 2052), 10);
        assert_eq!(cpu.a, b'Y' as Word);
        assert_eq!(buffer.contents(), b"Y");
        let step = exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 2052), 12);
        assert!(matches!(step.stop, Some(StopReason::TtyExhausted)));
    }

    #[test]
    fn punch_takes_the_low_eight_bits_of_a() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("punch");
        let (mut cpu, mut store) = (Cpu::new(), Store::cleared());
        let mut per = peripherals();
        per.punch = Punch::new(path.clone());
        cpu.a = 0o400101; // high bits ignored: 0o101 = 0x41
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 6144), 10);
        per.punch.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x41]);
    }

    #[test]
    fn teletype_output_takes_the_low_seven_bits() {
        let buffer = SharedBuffer::default();
        let (mut cpu, mut store) = (Cpu::new(), Store::cleared());
        let mut per = peripherals();
        per.tty_out = TtyOutput::to_writer(Box::new(buffer.clone()));
        cpu.a = b'A' as Word;
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 6148), 10);
        assert_eq!(buffer.contents(), b"A");
    }

    #[test]
    fn level_terminate_switches_the_register_cells() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 15, 7168), 10);
        assert_eq!((cpu.level, cpu.scr_index, cpu.b_index), (4, 6, 7));
        assert_eq!(cpu.elapsed_us, 19);
        // Jumps now go through cell 6.
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 8, 321), 20);
        assert_eq!(store.cell(SCR_LEVEL_4), 321);
        assert_eq!(store.cell(SCR_LEVEL_1), 11); // untouched since before
    }

    #[test]
    fn unknown_io_codes_are_fatal() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        store.set_cell(10, Instruction::from_parts(0, 15, 3000).bits());
        store.set_cell(SCR_LEVEL_1, 10);
        let result = cpu.step(&mut store, &mut per, &mut quiet());
        assert!(matches!(result, Err(Alarm::UnsupportedIo { code: 3000, .. })));
    }

    #[test]
    fn every_function_updates_its_count() {
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 4, 500), 10);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 1, 500), 12);
        exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, 1, 501), 14);
        assert_eq!(cpu.function_counts[4], 1);
        assert_eq!(cpu.function_counts[1], 2);
        assert_eq!(cpu.function_counts.iter().sum::<u64>(), 3);
    }

    #[test]
    fn registers_and_store_stay_inside_eighteen_bits() {
        // Drive a mix of arithmetic through the function unit and
        // check the containment invariant afterwards.
        let (mut cpu, mut store, mut per) = (Cpu::new(), Store::cleared(), peripherals());
        cpu.a = 0o777777;
        cpu.q = 0o777777;
        store.set_cell(500, 0o777777);
        for (f, a) in [(1, 500), (12, 500), (13, 500), (14, 17), (14, 8192 - 17), (2, 500), (10, 500)] {
            exec(&mut cpu, &mut store, &mut per, Instruction::from_parts(0, f, a), 10);
            assert!(cpu.a <= WORD_MASK);
            assert!(cpu.q <= WORD_MASK);
        }
        assert!((0..STORE_WORDS as u32).all(|a| store.cell(a) <= WORD_MASK));
    }
}
