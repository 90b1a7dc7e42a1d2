//! Sensor sweep for telemetry retrieval: fan speeds and PWMs from the
//! MAX31785, temperatures from the fan controller's ADC inputs, voltages
//! and currents from the two UCD90120A monitors.

use crate::fanctrl::{
    configure_switch, pmbus_read_u16, read_fan_pwm, read_fan_speed_rpm, FAN_CONT_SWITCH_SELECT,
    FAN_PAGES, FAN_CONT_TEMP_SENSOR_PAGE, FPGA_TEMP_DIODE_ADC_PAGE, INLET_TEMP_SENSOR_PAGE,
    MAX31785_I2C_DEVICE_ADDRESS, MEZZANINE_0_TEMP_ADC_PAGE, MEZZANINE_1_TEMP_ADC_PAGE,
    MEZZANINE_2_TEMP_ADC_PAGE, MEZZANINE_3_TEMP_ADC_PAGE, MONITOR_SWITCH_SELECT,
    NUM_CURRENT_MON_PAGES, NUM_VOLTAGE_MON_PAGES, OUTLET_TEMP_SENSOR_PAGE, READ_TEMPERATURE_1_CMD,
    READ_VOUT_CMD, UCD90120A_CMON_I2C_DEVICE_ADDRESS, UCD90120A_VMON_I2C_DEVICE_ADDRESS,
    VOUT_MODE_CMD,
};
use skarab_hal::hal_i2c::I2cMaster;

/// Words in the sensor telemetry block
pub const SENSOR_DATA_WORDS: usize = 106;

const TEMP_PAGES: [u8; 8] = [
    INLET_TEMP_SENSOR_PAGE,
    OUTLET_TEMP_SENSOR_PAGE,
    FPGA_TEMP_DIODE_ADC_PAGE,
    FAN_CONT_TEMP_SENSOR_PAGE,
    MEZZANINE_0_TEMP_ADC_PAGE,
    MEZZANINE_1_TEMP_ADC_PAGE,
    MEZZANINE_2_TEMP_ADC_PAGE,
    MEZZANINE_3_TEMP_ADC_PAGE,
];

/// Fill the telemetry block:
///   [0..5)    fan speeds, RPM
///   [5..10)   fan PWM readback
///   [10..18)  temperatures
///   [18..42)  voltage monitor (value, exponent) pairs
///   [42..66)  current monitor (value, exponent) pairs
/// Unreadable sensors report 0xFFFF so the host can tell "absent" from 0.
pub fn get_sensor_data(i2c: &mut I2cMaster, data: &mut [u16; SENSOR_DATA_WORDS]) {
    for w in data.iter_mut() {
        *w = 0;
    }

    for (i, page) in FAN_PAGES.iter().enumerate() {
        data[i] = read_fan_speed_rpm(i2c, *page);
        data[5 + i] = read_fan_pwm(i2c, *page);
    }

    configure_switch(i2c, FAN_CONT_SWITCH_SELECT);
    for (i, page) in TEMP_PAGES.iter().enumerate() {
        data[10 + i] =
            pmbus_read_u16(i2c, MAX31785_I2C_DEVICE_ADDRESS, *page, READ_TEMPERATURE_1_CMD)
                .unwrap_or(0xffff);
    }
    configure_switch(i2c, 0);

    configure_switch(i2c, MONITOR_SWITCH_SELECT);
    for page in 0..NUM_VOLTAGE_MON_PAGES {
        let at = 18 + page as usize * 2;
        data[at] = pmbus_read_u16(i2c, UCD90120A_VMON_I2C_DEVICE_ADDRESS, page, READ_VOUT_CMD)
            .unwrap_or(0xffff);
        data[at + 1] =
            pmbus_read_u16(i2c, UCD90120A_VMON_I2C_DEVICE_ADDRESS, page, VOUT_MODE_CMD)
                .unwrap_or(0xffff);
    }
    for page in 0..NUM_CURRENT_MON_PAGES {
        let at = 42 + page as usize * 2;
        data[at] = pmbus_read_u16(i2c, UCD90120A_CMON_I2C_DEVICE_ADDRESS, page, READ_VOUT_CMD)
            .unwrap_or(0xffff);
        data[at + 1] =
            pmbus_read_u16(i2c, UCD90120A_CMON_I2C_DEVICE_ADDRESS, page, VOUT_MODE_CMD)
                .unwrap_or(0xffff);
    }
    configure_switch(i2c, 0);
}
