use crate::error::ValidationError::{self, *};
use crate::Number;

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Config {
    pub nb_numbers: u8,
    pub min_number: Number,
    pub max_number: Number,
}

impl Config {
    pub fn new(nb_numbers: u8, min_number: Number, max_number: Number) -> Result<Self, ValidationError> {
        let config = Self {
            nb_numbers,
            min_number,
            max_number,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nb_numbers == 0 {
            return Err(IncorrectConfig);
        }

        if self.min_number >= self.max_number {
            return Err(IncorrectConfig);
        }

        // the range must be able to hold nb_numbers distinct values
        let range = u32::from(self.max_number) - u32::from(self.min_number) + 1;
        if range < u32::from(self.nb_numbers) {
            return Err(IncorrectConfig);
        }

        Ok(())
    }

    /// check if the numbers respect the config
    pub fn check_numbers(&self, numbers: &[Number]) -> Result<(), ValidationError> {
        if numbers.len() != self.nb_numbers as usize {
            return Err(IncorrectNbNumbers);
        }

        for (i, number) in numbers.iter().enumerate() {
            if *number > self.max_number || *number < self.min_number {
                return Err(NumberOutOfRange);
            }
            if numbers[..i].contains(number) {
                return Err(DuplicateNumber);
            }
        }

        Ok(())
    }
}
