//! legacy exit status codes for system programs.
//! reference: [SYSEXITS](https://man.freebsd.org/cgi/man.cgi?query=sysexits&apropos=0&sektion=0&manpath=FreeBSD+11.2-stable&arch=default&format=html)

/// value: 64 <br>
/// The command was used incorrectly, e.g., with the wrong number of arguments, a bad flag, a bad syntax in a parameter, etc.
pub const EX_USAGE: i32 = 64;

/// value: 70 <br>
/// An internal software error has been detected. Used when a backup run errored.
pub const EX_SOFTWARE: i32 = 70;

/// value: 74 <br>
/// An error occurred while doing I/O on some file.
pub const EX_IOERR: i32 = 74;

/// value: 75 <br>
/// Temporary failure, indicating something that is not really an error. Used when the
/// archive was written but could not be exported; the next run may succeed.
pub const EX_TEMPFAIL: i32 = 75;

/// value: 78 <br>
/// Something was found in an unconfigured or misconfigured state.
pub const EX_CONFIG: i32 = 78;
