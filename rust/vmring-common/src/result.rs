pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    fn check_len(len: usize) -> crate::Result<usize> {
        verify_arg!(len, len <= 16);
        Ok(len)
    }

    #[test]
    fn test_verify_arg_passes_through() {
        assert_eq!(check_len(16).unwrap(), 16);
    }

    #[test]
    fn test_verify_arg_reports_condition() {
        let err = check_len(17).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidArgument { name, message } => {
                assert_eq!(name, "len");
                assert_eq!(message, "len <= 16");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
        assert!(!err.is_construction_failure());
    }
}
